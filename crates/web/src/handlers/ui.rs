//! The operator pages and the JSON endpoints backing them.

use std::collections::HashMap;

use axum::{extract::State, response::Html, Json};
use dispatch::ipxe;
use models::{Event, Server};

use crate::{error::WebError, AppState};

pub async fn index(State(state): State<AppState>) -> Result<Html<String>, WebError> {
    render_page(&state, "index.html")
}

pub async fn events_page(State(state): State<AppState>) -> Result<Html<String>, WebError> {
    render_page(&state, "events.html")
}

pub async fn mappings_page(State(state): State<AppState>) -> Result<Html<String>, WebError> {
    render_page(&state, "mappings.html")
}

/// Every page shares one context: the advertised base URL, the configured
/// mappings and the script catalog for the boot-selection form.
fn render_page(state: &AppState, name: &str) -> Result<Html<String>, WebError> {
    let settings = config::settings();
    let scripts = ipxe::script_list(
        &settings.data_dir,
        &settings.env_dir,
        &settings.template_extension,
        &settings.environments(),
    );

    let mut context = tera::Context::new();
    context.insert("base_url", &settings.base_url());
    context.insert("hostname_maps", state.mappings.hostname_rules());
    context.insert("network_maps", state.mappings.network_rules());
    context.insert("scripts", &scripts);

    let mut body = String::new();
    for section in ["header.html", name, "footer.html"] {
        body.push_str(
            &state
                .pages
                .render(section, &context)
                .map_err(|err| WebError::internal(err.to_string()))?,
        );
    }
    Ok(Html(body))
}

/// The hosts still waiting for an operator to choose a script.
pub async fn server_list(State(state): State<AppState>) -> Json<Vec<Server>> {
    Json(state.registry.pending_servers())
}

/// The full per-MAC event history.
pub async fn event_list(State(state): State<AppState>) -> Json<HashMap<String, Vec<Event>>> {
    Json(state.events.snapshot())
}
