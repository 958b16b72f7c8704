//! The firmware-facing endpoints: the `/start` chain script, the polling
//! loop, and the operator's target selection.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, Form, Path, Query, State},
    response::Redirect,
};
use common::prelude::tracing;
use models::{Mac, Params, Server};
use serde_json::Value;

use crate::{error::WebError, AppState};

/// Entry point for iPXE boot agents, usually handed out by the DHCP
/// server. Gets the firmware into the polling loop.
pub async fn start(State(state): State<AppState>) -> Result<String, WebError> {
    Ok(state.dispatcher.start_script()?)
}

/// One iteration of the polling loop: returns the configured boot script,
/// or a retry/timeout script while the host waits for an operator.
pub async fn poll(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<String, WebError> {
    // iPXE sends MAC addresses with dashes instead of colons
    let mac: Mac = mac.parse().map_err(|_| {
        tracing::error!(%mac, "invalid MAC");
        WebError::internal("Invalid MAC")
    })?;
    let ip = addr.ip();
    tracing::debug!(%mac, %ip, "MAC and IP validated");

    let hostname = match query.get("host") {
        Some(host) if !host.is_empty() => host.clone(),
        _ => resolve_hostname(ip).await,
    };

    let server = Server::new(mac, ip, hostname);
    Ok(state.dispatcher.poll(server)?)
}

/// POST endpoint behind the operator form: records which script a pending
/// host should boot with.
pub async fn update_target(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Redirect, WebError> {
    let (mac, target, environment, params) = parse_target_form(form)?;

    let server = Server::new(mac, addr.ip(), "");
    state
        .dispatcher
        .update_target(&server, &target, &environment, params)?;
    Ok(Redirect::to("/"))
}

/// Splits the posted form into the addressing fields and the free-form
/// recipe parameters.
fn parse_target_form(
    form: HashMap<String, String>,
) -> Result<(Mac, String, String, Params), WebError> {
    let mut mac_raw = String::new();
    let mut target = String::new();
    let mut environment = String::new();
    let mut params = Params::new();

    for (key, value) in form {
        match key.as_str() {
            "mac" => mac_raw = value,
            "target" => target = value,
            "environment" => environment = value,
            _ => {
                params.insert(key, Value::String(value));
            }
        }
    }

    if mac_raw.is_empty() || target.is_empty() {
        return Err(WebError::bad_request(
            "MAC address and target must not be empty",
        ));
    }
    let mac: Mac = mac_raw
        .parse()
        .map_err(|_| WebError::bad_request("Invalid MAC"))?;

    Ok((mac, target, environment, params))
}

async fn resolve_hostname(ip: IpAddr) -> String {
    let resolved = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await;
    match resolved {
        Ok(Ok(hostname)) => hostname,
        _ => {
            tracing::info!(%ip, "can't resolve IP");
            String::new()
        }
    }
}
