//! Process-wide settings for the boot dispatcher.
//!
//! Every key can be given three ways, with the later sources winning:
//! a YAML config file (`--config`), a `BOOTLACE_`-prefixed environment
//! variable (`BOOTLACE_DATA_DIR`), or a command-line flag (`--data-dir`).

use std::{fs, path::PathBuf};

use clap::Parser;
use once_cell::sync::OnceCell;
use serde::Deserialize;

#[derive(Parser, Debug, Default)]
#[command(
    name = "bootlace",
    about = "Network boot dispatcher for iPXE firmware",
    version
)]
pub struct Cli {
    /// Path to a YAML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The port where I'm going to listen
    #[arg(long)]
    pub port: Option<u16>,

    /// The address where I'm going to listen
    #[arg(long)]
    pub domain: Option<String>,

    /// Directory with mappings, configs, templates, etc.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// A custom web directory with static files
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Directory with overrides
    #[arg(long)]
    pub env_dir: Option<String>,

    /// Boot template extension
    #[arg(long)]
    pub template_extension: Option<String>,

    /// My mappings YAML file
    #[arg(long)]
    pub mappings_file: Option<String>,

    /// Debug mode
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BootlaceConfig {
    pub port: u16,
    pub domain: String,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,
    pub env_dir: String,
    pub template_extension: String,
    pub mappings_file: String,
    pub debug: bool,
}

impl BootlaceConfig {
    /// The advertised `host:port` pair substituted into every generated
    /// boot script.
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.domain, self.port)
    }

    /// Path of the mappings YAML file.
    pub fn mappings_path(&self) -> PathBuf {
        self.data_dir.join(&self.mappings_file)
    }

    /// Names of the overlay environments: the directories directly under
    /// `data-dir/<env-dir>`, sorted. Missing overlay root means none.
    pub fn environments(&self) -> Vec<String> {
        let mut found = Vec::new();
        if let Ok(entries) = fs::read_dir(self.data_dir.join(&self.env_dir)) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    found.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        found.sort();
        found
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't load configuration: {0}")]
    Load(#[from] config_rs::ConfigError),

    #[error("you must specify the {0} parameter")]
    Missing(&'static str),
}

/// Merges defaults, config file, environment and flags into the final
/// settings. Flags win over environment variables, which win over the file.
pub fn load(cli: &Cli) -> Result<BootlaceConfig, ConfigError> {
    let mut builder = config_rs::Config::builder()
        .set_default("port", 8080i64)?
        .set_default("domain", "localhost")?
        .set_default("data_dir", "")?
        .set_default("static_dir", "web")?
        .set_default("env_dir", "env_overrides")?
        .set_default("template_extension", ".slc")?
        .set_default("mappings_file", "mappings.yaml")?
        .set_default("debug", false)?;

    if let Some(path) = &cli.config {
        builder = builder.add_source(config_rs::File::from(path.clone()));
    }

    builder = builder
        .add_source(config_rs::Environment::with_prefix("BOOTLACE"))
        .set_override_option("port", cli.port.map(i64::from))?
        .set_override_option("domain", cli.domain.clone())?
        .set_override_option(
            "data_dir",
            cli.data_dir.as_ref().map(|p| p.display().to_string()),
        )?
        .set_override_option(
            "static_dir",
            cli.static_dir.as_ref().map(|p| p.display().to_string()),
        )?
        .set_override_option("env_dir", cli.env_dir.clone())?
        .set_override_option("template_extension", cli.template_extension.clone())?
        .set_override_option("mappings_file", cli.mappings_file.clone())?
        .set_override_option("debug", cli.debug.then_some(true))?;

    let parsed: BootlaceConfig = builder.build()?.try_deserialize()?;

    if parsed.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::Missing("data-dir"));
    }
    if parsed.static_dir.as_os_str().is_empty() {
        return Err(ConfigError::Missing("static-dir"));
    }

    Ok(parsed)
}

static CONFIG: OnceCell<BootlaceConfig> = OnceCell::new();

/// Installs the loaded settings as the process-wide configuration.
pub fn init(config: BootlaceConfig) {
    CONFIG.set(config).expect("configuration already initialized");
}

pub fn settings() -> &'static BootlaceConfig {
    CONFIG.get().expect("configuration is not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let cli = Cli {
            data_dir: Some(PathBuf::from("/srv/bootlace")),
            ..Cli::default()
        };
        let config = load(&cli).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.domain, "localhost");
        assert_eq!(config.static_dir, PathBuf::from("web"));
        assert_eq!(config.env_dir, "env_overrides");
        assert_eq!(config.template_extension, ".slc");
        assert_eq!(config.mappings_file, "mappings.yaml");
        assert!(!config.debug);
        assert_eq!(config.base_url(), "localhost:8080");
        assert_eq!(
            config.mappings_path(),
            PathBuf::from("/srv/bootlace/mappings.yaml")
        );
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli {
            port: Some(9090),
            domain: Some("boot.example.com".to_string()),
            data_dir: Some(PathBuf::from("/data")),
            template_extension: Some(".tpl".to_string()),
            debug: true,
            ..Cli::default()
        };
        let config = load(&cli).unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.base_url(), "boot.example.com:9090");
        assert_eq!(config.template_extension, ".tpl");
        assert!(config.debug);
    }

    #[test]
    fn test_missing_data_dir_is_an_error() {
        let err = load(&Cli::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("data-dir")));
    }
}
