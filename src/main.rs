mod auth;
mod error;
mod form_verification;
mod geo;
mod ingest;
mod preferences;
#[cfg(test)]
mod testutils;
mod visitor_db;

use std::{env, net::SocketAddr, process::ExitCode, str::FromStr, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn, Level};

use crate::{
    geo::GeoClient,
    ingest::{router, AppState},
    preferences::{Preferences, StoreBackend},
    visitor_db::{rest::RestStore, PgStore, VisitorStore},
};

const CONFIG_PATH_VAR: &str = "VISITOR_GEO_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "./config.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let prefs = match Preferences::load_config(&config_path) {
        Ok(prefs) => prefs.apply_env_overrides(|key| env::var(key).ok()),
        Err(err) => {
            eprintln!("Error loading config from {config_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let level = match prefs.tracing_level() {
        Some(level) => level,
        None => {
            eprintln!(
                "Unknown log_level {:?}, logging at {}",
                prefs.log_level(),
                Level::INFO
            );
            Level::INFO
        }
    };
    tracing_subscriber::fmt()
        .with_level(true)
        .with_max_level(level)
        .init();

    match run(prefs).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(prefs: Preferences) -> Result<(), Box<dyn std::error::Error>> {
    let mmdb_url = prefs.mmdb_url()?;
    if mmdb_url.is_none() {
        warn!("MMDB url is not configured, every visit will be rejected");
    }

    let http = reqwest::Client::new();
    let store = connect_store(&prefs, http.clone()).await?;
    let state = AppState::new(GeoClient::new(http, mmdb_url), store);
    let app = router(state);

    let addr = SocketAddr::from_str(&format!("{}:{}", prefs.http_ip(), prefs.port()))?;
    match (prefs.https_cert_path(), prefs.https_key_path()) {
        (Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            info!("Listening on https://{addr}");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("Listening on http://{addr}");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

async fn connect_store(
    prefs: &Preferences,
    http: reqwest::Client,
) -> Result<Arc<dyn VisitorStore>, Box<dyn std::error::Error>> {
    match prefs.store_backend() {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(prefs.db_pool_size())
                .connect(&prefs.db_url())
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Connected to PostgreSQL");
            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Rest => {
            let store = RestStore::new(http, prefs.supabase_url(), prefs.supabase_anon_key())?;
            info!("Using REST store at {}", prefs.supabase_url());
            Ok(Arc::new(store))
        }
    }
}
