//! Dynamic configuration serving: rendered templates, their parameter
//! lists, and the iPXE boot menu.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use dispatch::{
    ipxe,
    polling::{base_url_for_env, PARAMS_BLACKLIST},
    templates::DEFAULT_ENVIRONMENT,
};
use models::Params;
use serde_json::Value;

use crate::{error::WebError, handlers::overlay, middleware::EnvName, AppState};

/// Everything under `/configs/`: static files below `static/`, rendered
/// templates otherwise.
pub async fn serve(
    State(state): State<AppState>,
    Path(path): Path<String>,
    EnvName(environment): EnvName,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, WebError> {
    if let Some(relative) = path.strip_prefix("static/") {
        return overlay::serve(relative, &environment).await;
    }
    render_config(&state, &path, &environment, query).map(IntoResponse::into_response)
}

/// Renders a template by name; the query string supplies the variables.
fn render_config(
    state: &AppState,
    name: &str,
    environment: &str,
    query: HashMap<String, String>,
) -> Result<String, WebError> {
    let mut params = Params::new();
    for (key, value) in query {
        params.insert(key, Value::String(value));
    }
    params.insert(
        "baseURL".to_owned(),
        Value::String(base_url_for_env(
            &config::settings().base_url(),
            environment,
        )),
    );

    state
        .templates
        .render(name, &params, environment)
        .map_err(|err| WebError::internal(err.to_string()))
}

/// The parameters a template needs, for the operator form. Values the
/// dispatcher injects itself are filtered out.
pub async fn script_params(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<String>>, WebError> {
    let script = query
        .get("script")
        .filter(|script| !script.is_empty())
        .ok_or_else(|| WebError::internal("Required script parameter"))?;
    let environment = query
        .get("environment")
        .filter(|environment| !environment.is_empty())
        .map(String::as_str)
        .unwrap_or(DEFAULT_ENVIRONMENT);

    let variables = state
        .templates
        .list_variables(script, environment)
        .into_iter()
        .filter(|variable| !PARAMS_BLACKLIST.contains(&variable.as_str()))
        .collect();
    Ok(Json(variables))
}

const MENU_HEADER: &str = "#!ipxe\nmenu Choose target to boot\n";

/// A generated iPXE menu offering every boot script on the filesystem.
pub async fn menu() -> Result<String, WebError> {
    let settings = config::settings();
    let scripts = ipxe::script_list(
        &settings.data_dir,
        &settings.env_dir,
        &settings.template_extension,
        &settings.environments(),
    );
    if scripts.is_empty() {
        return Err(WebError::internal("No Scripts Found"));
    }

    let mut body = String::from(MENU_HEADER);
    for script in &scripts {
        let description = if script.env.is_empty() {
            script.name.clone()
        } else {
            format!("{} [{}]", script.name, script.env)
        };
        body.push_str(&format!(
            "item {}{} {}\n",
            script.path, script.name, description
        ));
    }
    body.push_str(&format!(
        "\nchoose target\necho -n Enter hostname or none:\nread hostname\nset baseurl {}\n# Boot it as intended.\nchain ${{target}}\n",
        settings.base_url()
    ));
    Ok(body)
}
