use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{recipe::Params, server::Server};

/// What happened to a booting host. Serialized as the numeric code the
/// operator UI expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    HostPoll,
    UserSelection,
    HostBoot,
    HostTimeout,
}

impl EventKind {
    fn code(self) -> u8 {
        match self {
            EventKind::HostPoll => 0,
            EventKind::UserSelection => 1,
            EventKind::HostBoot => 2,
            EventKind::HostTimeout => 3,
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = u8::deserialize(deserializer)?;
        Ok(match v {
            0 => EventKind::HostPoll,
            1 => EventKind::UserSelection,
            2 => EventKind::HostBoot,
            3 => EventKind::HostTimeout,
            other => Err(serde::de::Error::custom(format!(
                "bad event kind code {other}"
            )))?,
        })
    }
}

/// How a booting host was matched to its script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMethod {
    /// The reverse-DNS hostname matched a hostname mapping.
    Dns,
    /// The client IP fell inside a network mapping.
    Subnet,
    /// An operator picked the script by hand.
    Manual,
}

impl BootMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            BootMethod::Dns => "DNS Match",
            BootMethod::Subnet => "Subnet Match",
            BootMethod::Manual => "Manual",
        }
    }
}

/// One entry in the per-host boot history. Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventType")]
    pub kind: EventKind,
    pub date: DateTime<Utc>,
    pub server: Server,
    #[serde(rename = "bootType")]
    pub boot_type: String,
    pub script: String,
    pub message: String,
    pub params: Option<Params>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        server: Server,
        method: Option<BootMethod>,
        script: impl Into<String>,
        params: Option<Params>,
    ) -> Self {
        let mut event = Event {
            kind,
            date: Utc::now(),
            server,
            boot_type: method.map(BootMethod::as_str).unwrap_or_default().to_owned(),
            script: script.into(),
            message: String::new(),
            params,
        };
        event.message = event.derive_message();
        event
    }

    fn derive_message(&self) -> String {
        match self.kind {
            EventKind::HostPoll => {
                format!("Host {} polled for a script.", self.server.hostname)
            }
            EventKind::UserSelection => format!(
                "A user selected {} for the host {}.",
                self.script, self.server.hostname
            ),
            EventKind::HostBoot => {
                let params = serde_json::to_string(&self.params).unwrap_or_default();
                format!(
                    "Host {} booted using {} method with the following parameters: {}",
                    self.server.hostname,
                    self.boot_type,
                    params
                )
            }
            EventKind::HostTimeout => format!("Host {} timed out.", self.server.hostname),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn test_server() -> Server {
        Server::new(
            "aa-bb-cc-dd-ee-ff".parse().unwrap(),
            "10.0.0.7".parse().unwrap(),
            "test_host",
        )
    }

    #[test]
    fn test_poll_message() {
        let event = Event::new(EventKind::HostPoll, test_server(), None, "", None);
        assert_eq!(event.message, "Host test_host polled for a script.");
        assert_eq!(event.boot_type, "");
    }

    #[test]
    fn test_selection_message() {
        let event = Event::new(
            EventKind::UserSelection,
            test_server(),
            None,
            "freebsd.ipxe",
            None,
        );
        assert_eq!(
            event.message,
            "A user selected freebsd.ipxe for the host test_host."
        );
    }

    #[test]
    fn test_boot_message_includes_params_as_json() {
        let mut params = Params::new();
        params.insert("version".to_owned(), Value::String("12345".to_owned()));
        params.insert("cloudconfig".to_owned(), Value::String("virtual".to_owned()));

        let event = Event::new(
            EventKind::HostBoot,
            test_server(),
            Some(BootMethod::Subnet),
            "freebsd.ipxe",
            Some(params),
        );
        // serde_json maps are ordered by key, so the rendering is stable
        assert_eq!(
            event.message,
            "Host test_host booted using Subnet Match method with the following parameters: \
             {\"cloudconfig\":\"virtual\",\"version\":\"12345\"}"
        );
    }

    #[test]
    fn test_timeout_message() {
        let event = Event::new(EventKind::HostTimeout, test_server(), None, "", None);
        assert_eq!(event.message, "Host test_host timed out.");
    }

    #[test]
    fn test_wire_format() {
        let mut event = Event::new(
            EventKind::HostPoll,
            test_server(),
            Some(BootMethod::Manual),
            "freebsd.ipxe",
            None,
        );
        event.date = DateTime::from_timestamp(0, 0).unwrap();
        event.message = String::new();

        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            "{\"eventType\":0,\"date\":\"1970-01-01T00:00:00Z\",\
             \"server\":{\"Mac\":\"aa:bb:cc:dd:ee:ff\",\"IP\":\"10.0.0.7\",\"Hostname\":\"test_host\"},\
             \"bootType\":\"Manual\",\"script\":\"freebsd.ipxe\",\"message\":\"\",\"params\":null}"
        );
    }
}
