mod catalog;
mod config;
mod handlers;
mod models;
mod tasks;
mod voting;

use catalog::{MapCatalog, StaticCatalog};
use config::Config;
use handlers::AppState;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use voting::{AccessGate, VoteEngine};

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let catalog: Arc<dyn MapCatalog> = match &config.catalog_path {
        Some(path) => match StaticCatalog::load(path) {
            Ok(catalog) => {
                if catalog.is_empty() {
                    warn!("Map catalog {} is empty, no options will be offered", path.display());
                } else {
                    info!("Loaded {} map(s) from {}", catalog.len(), path.display());
                }
                Arc::new(catalog)
            }
            Err(e) => {
                error!("Failed to load map catalog: {}", e);
                return;
            }
        },
        None => Arc::new(StaticCatalog::builtin()),
    };

    let engine = Arc::new(VoteEngine::new(config.registry.clone(), catalog));
    let gate = Arc::new(AccessGate::new(config.rate_limit));
    info!(
        "Voting on team modes {:?} with maps {:?}",
        engine.enabled_team_modes(),
        config.registry.vote_maps()
    );

    // --- Start Background Task for Rounds ---
    match config.round_timing {
        Some(timing) => {
            let engine = Arc::clone(&engine);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                tasks::round_scheduler::run_rounds_task(engine, gate, timing).await;
            });
        }
        None => info!("No round length configured, rounds are driven externally"),
    }

    if config.admin_token.is_none() {
        info!("VOTE_ADMIN_TOKEN not set, admin round routes disabled");
    }

    let app = handlers::router(AppState {
        engine,
        gate,
        proxy_ip_header: config.proxy_ip_header.clone(),
        admin_token: config.admin_token.clone(),
    });

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            return;
        }
    };
    info!("Vote API listening on {}", config.bind_addr);

    if let Err(why) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {:?}", why);
    }
}
