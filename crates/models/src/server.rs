use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::mac::Mac;

/// Uniquely identifies a machine that is trying to boot.
///
/// The field names on the wire (`Mac`, `IP`, `Hostname`) are part of the
/// operator-UI contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Server {
    pub mac: Mac,
    #[serde(rename = "IP")]
    pub ip: IpAddr,
    pub hostname: String,
}

impl Server {
    pub fn new(mac: Mac, ip: IpAddr, hostname: impl Into<String>) -> Self {
        Server {
            mac,
            ip,
            hostname: hostname.into(),
        }
    }
}
