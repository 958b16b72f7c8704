//! Append-only history of what every host did, keyed by MAC. Feeds the
//! operator UI's event view.

use std::collections::HashMap;

use models::Event;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<HashMap<String, Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: Event) {
        let mut events = self.events.lock();
        events
            .entry(event.server.mac.to_string())
            .or_default()
            .push(event);
    }

    /// A copy of the whole history, for the events JSON endpoint.
    pub fn snapshot(&self) -> HashMap<String, Vec<Event>> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{EventKind, Server};
    use pretty_assertions::assert_eq;

    fn server(mac: &str) -> Server {
        Server::new(mac.parse().unwrap(), "10.0.0.9".parse().unwrap(), "host-a")
    }

    #[test]
    fn test_events_group_by_mac() {
        let log = EventLog::new();
        log.add(Event::new(
            EventKind::HostPoll,
            server("aa:bb:cc:dd:ee:ff"),
            None,
            "",
            None,
        ));
        log.add(Event::new(
            EventKind::HostBoot,
            server("aa:bb:cc:dd:ee:ff"),
            None,
            "ubuntu.ipxe",
            None,
        ));
        log.add(Event::new(
            EventKind::HostPoll,
            server("11:22:33:44:55:66"),
            None,
            "",
            None,
        ));

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["aa:bb:cc:dd:ee:ff"].len(), 2);
        assert_eq!(snapshot["11:22:33:44:55:66"].len(), 1);
    }

    #[test]
    fn test_events_keep_append_order() {
        let log = EventLog::new();
        for script in ["first.ipxe", "second.ipxe"] {
            log.add(Event::new(
                EventKind::UserSelection,
                server("aa:bb:cc:dd:ee:ff"),
                None,
                script,
                None,
            ));
        }

        let snapshot = log.snapshot();
        let scripts: Vec<&str> = snapshot["aa:bb:cc:dd:ee:ff"]
            .iter()
            .map(|e| e.script.as_str())
            .collect();
        assert_eq!(scripts, vec!["first.ipxe", "second.ipxe"]);
    }
}
