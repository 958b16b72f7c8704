//! Shared third-party stack for the bootlace workspace.
//!
//! Member crates pull widely-used dependencies from here so version and
//! feature choices live in one place.

pub mod prelude {
    pub use anyhow;
    pub use axum;
    pub use chrono;
    pub use glob;
    pub use hyper;
    pub use ipnet;
    pub use macaddr;
    pub use once_cell;
    pub use parking_lot;
    pub use regex;
    pub use serde_json;
    pub use serde_yaml;
    pub use tera;
    pub use thiserror;
    pub use tokio;
    pub use tokio_util;
    pub use tower_http;
    pub use tracing;

    pub use serde::{Deserialize, Serialize};
}
