//! Request handlers for the boot-dispatch HTTP surface.

pub mod boot;
pub mod configs;
pub mod overlay;
pub mod ui;
