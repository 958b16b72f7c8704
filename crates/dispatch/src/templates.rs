//! The boot-script template library.
//!
//! Templates live under the data directory as `.ipxe<ext>` files. Everything
//! outside the overlay subtree belongs to the `default` environment; files
//! under `<data-dir>/<env-dir>/<env>/...` overlay the default set for that
//! environment. An environment is materialized lazily, as a clone of the
//! fully-parsed default set, the first time one of its files is seen.
//!
//! A template file names itself on its first line:
//!
//! ```text
//! {{define "ubuntu.ipxe"}}
//! #!ipxe
//! kernel http://{{.baseURL}}/vmlinuz hostname={{.hostname}}
//! {{end}}
//! ```
//!
//! The `{{.VAR}}` references are collected per template so the operator UI
//! can ask which variables a script needs, and are rewritten to the engine
//! syntax at load time.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use common::prelude::tracing;
use models::Params;
use once_cell::sync::Lazy;
use regex::Regex;
use tera::Tera;

pub const DEFAULT_ENVIRONMENT: &str = "default";

static VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\.(.*?)\}\}").expect("variable regex"));
static DEFINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\{define\s+"(.*?)".*\}\}"#).expect("define regex"));

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("couldn't read template {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("template {} does not start with a define header", .path.display())]
    MissingDefine { path: PathBuf },

    #[error("default template {name} added after environments were cloned")]
    DefaultSealed { name: String },

    #[error("unknown template {name}")]
    Unknown { name: String },

    #[error("Missing variables in request: {}", .missing.join(", "))]
    MissingVariables { missing: Vec<String> },

    #[error(transparent)]
    Engine(#[from] tera::Error),

    #[error("invalid template glob: {0}")]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Clone, Default)]
struct EnvTemplates {
    engine: Tera,
    variables: HashMap<String, Vec<String>>,
}

struct TemplateInfo {
    name: String,
    variables: Vec<String>,
    body: String,
}

/// All parsed boot-script templates, grouped per environment. Immutable
/// once loaded.
#[derive(Debug, Default)]
pub struct TemplateStore {
    environments: HashMap<String, EnvTemplates>,
    sealed: bool,
}

impl TemplateStore {
    pub fn new() -> Self {
        let mut environments = HashMap::new();
        environments.insert(DEFAULT_ENVIRONMENT.to_owned(), EnvTemplates::default());
        TemplateStore {
            environments,
            sealed: false,
        }
    }

    /// Walks the data directory twice: first everything outside the overlay
    /// subtree into `default`, then each overlay file into its environment.
    pub fn load(
        data_dir: &Path,
        env_dir: &str,
        template_extension: &str,
    ) -> Result<Self, TemplateError> {
        let mut store = TemplateStore::new();
        let suffix = format!(".ipxe{template_extension}");
        let overlay_root = data_dir.join(env_dir);

        tracing::debug!(dir = %data_dir.display(), "template parsing started");

        let pattern = format!("{}/**/*{}", data_dir.display(), suffix);
        for path in glob::glob(&pattern)?.flatten() {
            if path.starts_with(&overlay_root) {
                continue;
            }
            tracing::info!(file = %path.display(), "parsing template");
            store.add_template_file(&path, DEFAULT_ENVIRONMENT)?;
        }

        let overlay_pattern = format!("{}/*/**/*{}", overlay_root.display(), suffix);
        for path in glob::glob(&overlay_pattern)?.flatten() {
            let environment = environment_from_path(&overlay_root, &path);
            let Some(environment) = environment else {
                continue;
            };
            tracing::info!(file = %path.display(), %environment, "parsing override");
            store.add_template_file(&path, &environment)?;
        }

        tracing::debug!("template parsing ended");
        Ok(store)
    }

    /// Parses one template file into the given environment. Adding to the
    /// default set once an environment has been cloned from it would leave
    /// the clones stale, so that is a hard error.
    pub fn add_template_file(&mut self, path: &Path, environment: &str) -> Result<(), TemplateError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_owned(),
            source,
        })?;
        let info = parse_template(path, &raw)?;

        if environment == DEFAULT_ENVIRONMENT && self.sealed {
            return Err(TemplateError::DefaultSealed { name: info.name });
        }
        self.ensure_environment(environment);

        let env = self
            .environments
            .get_mut(environment)
            .expect("environment was just ensured");
        env.engine.add_raw_template(&info.name, &info.body)?;
        env.variables.insert(info.name, info.variables);
        Ok(())
    }

    fn ensure_environment(&mut self, environment: &str) {
        if self.environments.contains_key(environment) {
            return;
        }
        let default = self.environments[DEFAULT_ENVIRONMENT].clone();
        self.environments.insert(environment.to_owned(), default);
        self.sealed = true;
    }

    /// Renders `name` with `params` in the named environment, falling back
    /// to the default environment when an overlay render fails. A render
    /// that fails because variables are unbound reports exactly the
    /// variables the template requires but the caller did not supply.
    pub fn render(
        &self,
        name: &str,
        params: &Params,
        env_name: &str,
    ) -> Result<String, TemplateError> {
        let env_name = if env_name.is_empty() {
            DEFAULT_ENVIRONMENT
        } else {
            env_name
        };
        tracing::info!(template = name, env = env_name, "template requested");

        let context = tera::Context::from_value(serde_json::Value::Object(params.clone()))?;

        let mut rendering = match self.environments.get(env_name) {
            Some(env) => env.engine.render(name, &context),
            None => Err(tera::Error::msg(format!("unknown environment {env_name}"))),
        };
        let mut vars_env = env_name;

        // overlay fallback
        if rendering.is_err() && env_name != DEFAULT_ENVIRONMENT {
            rendering = self.environments[DEFAULT_ENVIRONMENT]
                .engine
                .render(name, &context);
            vars_env = DEFAULT_ENVIRONMENT;
        }

        match rendering {
            Ok(text) => Ok(text),
            Err(source) => {
                let required = self.list_variables(name, vars_env);
                if required.is_empty() && !self.knows(name, vars_env) {
                    return Err(TemplateError::Unknown {
                        name: name.to_owned(),
                    });
                }
                let missing: Vec<String> = required
                    .into_iter()
                    .filter(|variable| !params.contains_key(variable))
                    .collect();
                if missing.is_empty() {
                    tracing::info!(template = name, err = %source, "render failed");
                    Err(TemplateError::Engine(source))
                } else {
                    tracing::info!(template = name, ?missing, "missing variables in request");
                    Err(TemplateError::MissingVariables { missing })
                }
            }
        }
    }

    /// The variables the named template references, captured at load time
    /// in first-seen order. Empty when the template is unknown in that
    /// environment.
    pub fn list_variables(&self, name: &str, env_name: &str) -> Vec<String> {
        self.environments
            .get(env_name)
            .and_then(|env| env.variables.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn knows(&self, name: &str, env_name: &str) -> bool {
        self.environments
            .get(env_name)
            .map(|env| env.variables.contains_key(name))
            .unwrap_or(false)
    }
}

/// The environment an overlay file belongs to: the first path component
/// below the overlay root.
fn environment_from_path(overlay_root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(overlay_root).ok()?;
    relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}

fn parse_template(path: &Path, raw: &str) -> Result<TemplateInfo, TemplateError> {
    let mut lines = raw.lines();
    let first = lines.next().unwrap_or_default();
    let name = DEFINE_RE
        .captures(first)
        .map(|caps| caps[1].to_owned())
        .ok_or_else(|| TemplateError::MissingDefine {
            path: path.to_owned(),
        })?;

    let mut variables: Vec<String> = Vec::new();
    for caps in VAR_RE.captures_iter(raw) {
        let variable = caps[1].to_owned();
        if !variables.contains(&variable) {
            variables.push(variable);
        }
    }

    let mut body_lines: Vec<&str> = lines.collect();
    if body_lines
        .last()
        .map(|line| matches!(line.trim(), "{{end}}" | "{{ end }}"))
        .unwrap_or(false)
    {
        body_lines.pop();
    }
    let body = VAR_RE
        .replace_all(&body_lines.join("\n"), "{{ $1 }}")
        .into_owned();

    Ok(TemplateInfo {
        name,
        variables,
        body,
    })
}
