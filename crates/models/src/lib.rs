//! Domain types shared across the bootlace workspace: MAC addresses,
//! server identities, boot recipes and the event history entries shown in
//! the operator UI.

pub mod event;
pub mod mac;
pub mod recipe;
pub mod server;

pub use event::{BootMethod, Event, EventKind};
pub use mac::Mac;
pub use recipe::{Params, Recipe};
pub use server::Server;
