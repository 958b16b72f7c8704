use std::sync::Arc;

use clap::Parser;
use dispatch::{registry, Dispatcher, EventLog, Mappings, Registry, TemplateStore};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use web::AppState;

/// 1. parse flags / env / config file into the global settings
/// 2. load the mapping and template stores
/// 3. start the registry sweeper
/// 4. serve HTTP until ctrl-c
#[tokio::main]
async fn main() {
    let cli = config::Cli::parse();
    let settings = match config::load(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("[*] {err}");
            eprintln!("\nParameters can be specified as flags, environment variables or in a config file.");
            std::process::exit(1);
        }
    };
    config::init(settings);
    let settings = config::settings();

    let max_level = if settings.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = tracing_subscriber::fmt().with_max_level(max_level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("couldn't set up tracing");

    tracing::info!("tracing has been started");
    tracing::info!(environments = ?settings.environments(), "overrides found");

    let mappings = match Mappings::load(&settings.mappings_path()) {
        Ok(mappings) => Arc::new(mappings),
        Err(err) => {
            tracing::error!(%err, "couldn't load mappings");
            std::process::exit(1);
        }
    };

    let templates = match TemplateStore::load(
        &settings.data_dir,
        &settings.env_dir,
        &settings.template_extension,
    ) {
        Ok(templates) => Arc::new(templates),
        Err(err) => {
            tracing::error!(%err, "couldn't load templates");
            std::process::exit(1);
        }
    };

    let pages = match web::pages::load(&settings.static_dir) {
        Ok(pages) => Arc::new(pages),
        Err(err) => {
            tracing::error!(%err, "couldn't load UI page templates");
            std::process::exit(1);
        }
    };

    let registry_store = Arc::new(Registry::new());
    let events = Arc::new(EventLog::new());
    let dispatcher = Arc::new(Dispatcher::new(
        mappings.clone(),
        templates.clone(),
        registry_store.clone(),
        events.clone(),
        settings.base_url(),
    ));

    let cancel = CancellationToken::new();
    tokio::spawn(registry::run_sweeper(registry_store.clone(), cancel.clone()));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let state = AppState {
        dispatcher,
        mappings,
        templates,
        registry: registry_store,
        events,
        pages,
    };

    if let Err(err) = web::serve(state, cancel).await {
        tracing::error!(%err, "server exited");
        std::process::exit(1);
    }
}
