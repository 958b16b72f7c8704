//! The pending-host registry: every MAC that polled without matching a rule
//! is parked here until an operator assigns a target, the retry budget runs
//! out, or the sweeper expires it.

use std::{
    collections::{hash_map::Entry, HashMap},
    time::Duration,
};

use chrono::Utc;
use common::prelude::tracing;
use models::{Mac, Params, Recipe, Server};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// How many retry polls a host gets before it is timed out.
pub const MAX_RETRY: u32 = 10;

/// Entries untouched for this long are collected by the sweeper.
const EXPIRE_AFTER_SECS: i64 = 180;

const CLEAN_INTERVAL: Duration = Duration::from_secs(60);

/// State of one host waiting in the polling loop.
///
/// `target` is `None` until an operator picks a script; `retry` counts the
/// polls served so far and `last_access` (unix seconds) feeds the sweeper.
#[derive(Debug, Clone)]
pub struct PendingState {
    pub server: Server,
    pub target: Option<String>,
    pub environment: String,
    pub params: Params,
    pub retry: u32,
    pub last_access: i64,
}

/// What the dispatcher should do for a poll, decided in one registry
/// transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// An operator chose this recipe; the entry has been removed.
    Boot(Recipe),
    /// Keep the firmware looping. `first_seen` is set when this poll
    /// created the entry.
    Retry { first_seen: bool },
    /// The retry budget is exhausted; the entry has been removed.
    Timeout,
}

#[derive(Debug, Default)]
pub struct Registry {
    servers: RwLock<HashMap<Mac, PendingState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the per-MAC state machine for one poll. The whole
    /// read-modify-write runs under a single write-lock acquisition so
    /// concurrent polls for the same MAC serialize cleanly.
    pub fn advance(&self, server: &Server) -> PollStep {
        let now = Utc::now().timestamp();
        let mut servers = self.servers.write();

        let state = match servers.entry(server.mac) {
            Entry::Vacant(slot) => {
                slot.insert(PendingState {
                    server: server.clone(),
                    target: None,
                    environment: String::new(),
                    params: Params::new(),
                    retry: 1,
                    last_access: now,
                });
                tracing::debug!(mac = %server.mac, "new server");
                return PollStep::Retry { first_seen: true };
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if state.target.is_none() && state.retry <= MAX_RETRY {
            state.retry += 1;
            state.last_access = now;
            tracing::debug!(mac = %server.mac, retry = state.retry, "retrying reboot");
            return PollStep::Retry { first_seen: false };
        }

        let state = servers
            .remove(&server.mac)
            .expect("entry exists under the write lock");
        match state.target {
            Some(name) => {
                tracing::debug!(mac = %server.mac, target = %name, "server boot");
                PollStep::Boot(Recipe {
                    name,
                    environment: state.environment,
                    params: state.params,
                })
            }
            None => {
                tracing::debug!(mac = %server.mac, "timing out server");
                PollStep::Timeout
            }
        }
    }

    /// Records the operator's choice for a pending MAC. Returns false when
    /// the MAC is not in the booting state.
    pub fn set_target(
        &self,
        mac: Mac,
        target: &str,
        environment: &str,
        params: Params,
    ) -> bool {
        let mut servers = self.servers.write();
        match servers.get_mut(&mac) {
            Some(state) => {
                state.target = Some(target.to_owned());
                state.environment = environment.to_owned();
                state.params = params;
                true
            }
            None => false,
        }
    }

    /// The servers still waiting for an operator, sorted by MAC. Hosts with
    /// an assigned target are about to boot and are not listed.
    pub fn pending_servers(&self) -> Vec<Server> {
        let servers = self.servers.read();
        let mut pending: Vec<Server> = servers
            .values()
            .filter(|state| state.target.is_none())
            .map(|state| state.server.clone())
            .collect();
        pending.sort_by_key(|server| server.mac);
        pending
    }

    /// Drops every entry that has not been touched within the expiry
    /// window.
    fn sweep(&self, now: i64) {
        let expire = now - EXPIRE_AFTER_SECS;
        tracing::debug!(before = expire, "cleaning stale pending hosts");
        let mut servers = self.servers.write();
        servers.retain(|mac, state| {
            if state.last_access <= expire {
                tracing::debug!(%mac, "mac cleaned");
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    fn backdate(&self, mac: Mac, last_access: i64) {
        if let Some(state) = self.servers.write().get_mut(&mac) {
            state.last_access = last_access;
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.servers.read().len()
    }
}

/// Periodically expires stale registry entries until the token fires at
/// shutdown.
pub async fn run_sweeper(registry: std::sync::Arc<Registry>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(CLEAN_INTERVAL);
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => registry.sweep(Utc::now().timestamp()),
        }
    }
    tracing::debug!("sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn server(mac: &str) -> Server {
        Server::new(mac.parse().unwrap(), "10.0.0.9".parse().unwrap(), "")
    }

    #[test]
    fn test_first_poll_creates_a_pending_entry() {
        let registry = Registry::new();
        let step = registry.advance(&server("aa:bb:cc:dd:ee:ff"));

        assert_eq!(step, PollStep::Retry { first_seen: true });
        assert_eq!(registry.pending_servers().len(), 1);
    }

    #[test]
    fn test_subsequent_polls_bump_retry_only() {
        let registry = Registry::new();
        let srv = server("aa:bb:cc:dd:ee:ff");

        registry.advance(&srv);
        let step = registry.advance(&srv);
        assert_eq!(step, PollStep::Retry { first_seen: false });
        // still exactly one entry for the MAC
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_retry_budget_exhaustion_times_out_on_the_twelfth_poll() {
        let registry = Registry::new();
        let srv = server("aa:bb:cc:dd:ee:ff");

        for _ in 0..11 {
            assert!(matches!(registry.advance(&srv), PollStep::Retry { .. }));
        }
        assert_eq!(registry.advance(&srv), PollStep::Timeout);
        assert_eq!(registry.len(), 0);

        // the next poll starts a fresh cycle
        assert_eq!(
            registry.advance(&srv),
            PollStep::Retry { first_seen: true }
        );
    }

    #[test]
    fn test_set_target_then_boot_consumes_the_entry() {
        let registry = Registry::new();
        let srv = server("aa:bb:cc:dd:ee:ff");
        registry.advance(&srv);

        let mut params = Params::new();
        params.insert(
            "version".to_owned(),
            serde_json::Value::String("12".to_owned()),
        );
        assert!(registry.set_target(srv.mac, "custom.ipxe", "prod", params));

        // a host with a target is no longer "pending" for the UI
        assert!(registry.pending_servers().is_empty());

        match registry.advance(&srv) {
            PollStep::Boot(recipe) => {
                assert_eq!(recipe.name, "custom.ipxe");
                assert_eq!(recipe.environment, "prod");
                assert!(recipe.params.contains_key("version"));
            }
            other => panic!("expected a boot, got {other:?}"),
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_set_target_for_unknown_mac_is_rejected() {
        let registry = Registry::new();
        assert!(!registry.set_target(
            "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            "custom.ipxe",
            "",
            Params::new()
        ));
    }

    #[test]
    fn test_pending_servers_sorted_by_mac() {
        let registry = Registry::new();
        registry.advance(&server("0a:00:00:00:00:02"));
        registry.advance(&server("0a:00:00:00:00:01"));
        registry.advance(&server("0a:00:00:00:00:03"));

        let macs: Vec<String> = registry
            .pending_servers()
            .iter()
            .map(|s| s.mac.to_string())
            .collect();
        assert_eq!(
            macs,
            vec![
                "0a:00:00:00:00:01",
                "0a:00:00:00:00:02",
                "0a:00:00:00:00:03"
            ]
        );
    }

    #[test]
    fn test_sweep_expires_only_stale_entries() {
        let registry = Registry::new();
        let stale = server("aa:aa:aa:aa:aa:01");
        let fresh = server("aa:aa:aa:aa:aa:02");
        registry.advance(&stale);
        registry.advance(&fresh);

        let now = Utc::now().timestamp();
        registry.backdate(stale.mac, now - EXPIRE_AFTER_SECS - 1);
        registry.sweep(now);

        let remaining = registry.pending_servers();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].mac, fresh.mac);
    }
}
