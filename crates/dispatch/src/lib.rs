//! The boot-dispatch core: rule matching, the boot-script template store,
//! the pending-host registry and the poll/update state machine that glues
//! them together.
//!
//! Everything here is transport-agnostic; the `web` crate turns HTTP
//! requests into calls on [`polling::Dispatcher`] and friends.

pub mod events;
pub mod ipxe;
pub mod mappings;
pub mod polling;
pub mod registry;
pub mod templates;

pub use events::EventLog;
pub use mappings::Mappings;
pub use polling::Dispatcher;
pub use registry::Registry;
pub use templates::TemplateStore;
