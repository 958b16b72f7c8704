//! The poll and update-target protocols: what a booting host is told every
//! time its firmware asks for a script, and how an operator's choice feeds
//! back into the next poll.

use std::sync::Arc;

use common::prelude::tracing;
use models::{BootMethod, Event, EventKind, Mac, Params, Recipe, Server};
use serde_json::Value;

use crate::{
    events::EventLog,
    mappings::Mappings,
    registry::{PollStep, Registry},
    templates::{TemplateError, TemplateStore},
};

/// Parameters the operator UI must not offer as free-form fields.
pub const PARAMS_BLACKLIST: &[&str] = &["baseURL"];

const START_SCRIPT: &str = "#!ipxe\n\
    echo bootlace starts polling\n\
    chain --autofree --replace \\\n\
    \x20   http://{{ baseURL }}/poll/1/${netX/mac:hexhyp}\n\
    #\n\
    #\n\
    # Do\n\
    #    curl http://{{ baseURL }}/poll/1/06-66-de-ad-be-ef\n\
    # to get an idea about what the iPXE client will receive.\n";

const RETRY_SCRIPT: &str = "#!ipxe\n\
    prompt --key 0x02 --timeout 7000 bootlace: Press Ctrl-B for manual override... \\\n\
    \x20 && chain -ar http://{{ baseURL }}/ipxemenu \\\n\
    \x20 || chain -ar http://{{ baseURL }}/poll/1/{{ macAddress }}\n\
    #\n\
    # FYI: For the iPXE client is the above an endless loop,\n\
    #      but it is the bootlace server that decides if it loops.\n";

const TIMEOUT_SCRIPT: &str = "#!ipxe\n\
    echo\n\
    echo bootlace is out of retries\n\
    echo\n\
    exit\n";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("MAC is not in the booting state")]
    NotBooting,

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The dry-run render of an operator selection failed; the selection
    /// (not the server) is at fault.
    #[error("{0}")]
    DryRun(TemplateError),
}

impl DispatchError {
    /// Whether the error was caused by caller input rather than server
    /// state; the HTTP layer maps this to 4xx vs 5xx.
    pub fn is_user_error(&self) -> bool {
        matches!(self, DispatchError::NotBooting | DispatchError::DryRun(_))
    }
}

/// Glues the mapping store, template store, registry and event log into the
/// boot-dispatch state machine.
pub struct Dispatcher {
    mappings: Arc<Mappings>,
    templates: Arc<TemplateStore>,
    registry: Arc<Registry>,
    events: Arc<EventLog>,
    base_url: String,
}

impl Dispatcher {
    pub fn new(
        mappings: Arc<Mappings>,
        templates: Arc<TemplateStore>,
        registry: Arc<Registry>,
        events: Arc<EventLog>,
        base_url: impl Into<String>,
    ) -> Self {
        Dispatcher {
            mappings,
            templates,
            registry,
            events,
            base_url: base_url.into(),
        }
    }

    /// The `/start` entry point: tells the firmware to chain into the
    /// polling loop.
    pub fn start_script(&self) -> Result<String, DispatchError> {
        let mut context = tera::Context::new();
        context.insert("baseURL", &self.base_url);
        tera::Tera::one_off(START_SCRIPT, &context, false)
            .map_err(|e| DispatchError::Template(e.into()))
    }

    /// Serves one firmware poll: a matching rule boots the host right away,
    /// otherwise the host is parked in the registry and told to retry until
    /// an operator picks a target or the retry budget runs out.
    pub fn poll(&self, server: Server) -> Result<String, DispatchError> {
        if let Some(script) = self.attempt_automatic_boot(&server)? {
            return Ok(script);
        }
        self.manual_action(server)
    }

    fn attempt_automatic_boot(&self, server: &Server) -> Result<Option<String>, DispatchError> {
        // reverse hostname matched against the hostname patterns
        if let Some(mut recipe) = self.mappings.find_for_hostname(&server.hostname) {
            tracing::debug!(host = %server.hostname, "host found in hostname mappings");
            // the event carries the recipe's own params
            self.events.add(Event::new(
                EventKind::HostBoot,
                server.clone(),
                Some(BootMethod::Dns),
                &recipe.name,
                Some(recipe.params.clone()),
            ));
            recipe
                .params
                .insert("hostname".to_owned(), Value::String(server.hostname.clone()));
            return Ok(Some(self.render_boot_script(recipe)?));
        }
        tracing::debug!(host = %server.hostname, "host not found in hostname mappings");

        // client IP matched against the configured subnets
        if let Some(mut recipe) = self.mappings.find_for_network(server.ip) {
            tracing::debug!(ip = %server.ip, "host found in network mappings");
            ensure_hostname(&mut recipe.params, server.mac);
            let mut server = server.clone();
            server.hostname = param_hostname(&recipe.params);
            self.events.add(Event::new(
                EventKind::HostBoot,
                server,
                Some(BootMethod::Subnet),
                &recipe.name,
                Some(recipe.params.clone()),
            ));
            return Ok(Some(self.render_boot_script(recipe)?));
        }
        tracing::debug!(ip = %server.ip, "host not found in network mappings");

        Ok(None)
    }

    fn manual_action(&self, mut server: Server) -> Result<String, DispatchError> {
        match self.registry.advance(&server) {
            PollStep::Boot(mut recipe) => {
                ensure_hostname(&mut recipe.params, server.mac);
                server.hostname = param_hostname(&recipe.params);
                self.events.add(Event::new(
                    EventKind::HostBoot,
                    server,
                    Some(BootMethod::Manual),
                    &recipe.name,
                    Some(recipe.params.clone()),
                ));
                self.render_boot_script(recipe)
            }
            PollStep::Retry { first_seen } => {
                if first_seen {
                    self.events.add(Event::new(
                        EventKind::HostPoll,
                        server.clone(),
                        None,
                        "",
                        None,
                    ));
                }
                self.retry_script(server.mac)
            }
            PollStep::Timeout => {
                self.events.add(Event::new(
                    EventKind::HostTimeout,
                    server.clone(),
                    None,
                    "",
                    None,
                ));
                Ok(TIMEOUT_SCRIPT.to_owned())
            }
        }
    }

    /// Injects the environment-aware base URL and renders the recipe. No
    /// registry lock is held here.
    fn render_boot_script(&self, mut recipe: Recipe) -> Result<String, DispatchError> {
        recipe.params.insert(
            "baseURL".to_owned(),
            Value::String(base_url_for_env(&self.base_url, &recipe.environment)),
        );
        Ok(self
            .templates
            .render(&recipe.name, &recipe.params, &recipe.environment)?)
    }

    fn retry_script(&self, mac: Mac) -> Result<String, DispatchError> {
        let mut context = tera::Context::new();
        context.insert("baseURL", &self.base_url);
        context.insert("macAddress", &mac.dashed());
        tera::Tera::one_off(RETRY_SCRIPT, &context, false)
            .map_err(|e| DispatchError::Template(e.into()))
    }

    /// Records the operator's recipe choice for a pending MAC. The recipe
    /// is dry-run rendered first so a bad selection bounces back to the
    /// operator instead of wedging the host's next poll.
    pub fn update_target(
        &self,
        server: &Server,
        script_name: &str,
        env_name: &str,
        mut params: Params,
    ) -> Result<(), DispatchError> {
        ensure_hostname(&mut params, server.mac);
        params.insert(
            "baseURL".to_owned(),
            Value::String(base_url_for_env(&self.base_url, env_name)),
        );
        self.templates
            .render(script_name, &params, env_name)
            .map_err(DispatchError::DryRun)?;

        if !self
            .registry
            .set_target(server.mac, script_name, env_name, params.clone())
        {
            return Err(DispatchError::NotBooting);
        }
        tracing::debug!(
            server = %server.mac,
            target = script_name,
            environment = env_name,
            "setting server override"
        );
        self.events.add(Event::new(
            EventKind::UserSelection,
            server.clone(),
            None,
            script_name,
            None,
        ));
        Ok(())
    }
}

/// Fills in `params["hostname"]` when the recipe does not set one:
/// the dash form of the MAC, with an optional `hostnamePrefix` prepended.
pub fn ensure_hostname(params: &mut Params, mac: Mac) {
    if params.contains_key("hostname") {
        return;
    }
    let hostname = mac.dashed();
    let prefix = params
        .get("hostnamePrefix")
        .and_then(Value::as_str)
        .unwrap_or_default();
    params.insert(
        "hostname".to_owned(),
        Value::String(format!("{prefix}{hostname}")),
    );
}

fn param_hostname(params: &Params) -> String {
    params
        .get("hostname")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// The base URL advertised inside rendered scripts; environment-scoped
/// requests get the `/env/<name>` prefix baked in.
pub fn base_url_for_env(base_url: &str, environment: &str) -> String {
    if environment.is_empty() {
        base_url.to_owned()
    } else {
        format!("{base_url}/env/{environment}")
    }
}
