use std::{fmt, fs, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, Level};
use url::Url;

#[derive(Debug, Error)]
pub enum PrefError {
    #[error("couldn't access config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("couldn't parse config file: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("couldn't write default config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("{0} is not a valid url: {1}")]
    InvalidUrl(&'static str, url::ParseError),
}

/// Which relational store the visitor records go to
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Direct PostgreSQL connection pool
    Postgres,
    /// PostgREST endpoint (Supabase REST API)
    Rest,
}

#[derive(Deserialize, Serialize, Clone)]
pub struct Preferences {
    http_ip: String,
    port: u16,
    https_cert_path: Option<String>,
    https_key_path: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
    mmdb_url: Option<String>,
    store_backend: StoreBackend,
    db_ip: String,
    db_port: u16,
    db_name: String,
    db_user: String,
    db_pass: String,
    db_pool_size: u32,
    database_url: Option<String>,
    #[serde(default)]
    supabase_url: String,
    #[serde(default)]
    supabase_anon_key: String,
}

fn default_log_level() -> String {
    String::from("info")
}

impl fmt::Debug for Preferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preferences")
            .field("http_ip", &self.http_ip)
            .field("port", &self.port)
            .field("https_cert_path", &self.https_cert_path)
            .field("https_key_path", &self.https_key_path)
            .field("log_level", &self.log_level)
            .field("mmdb_url", &self.mmdb_url)
            .field("store_backend", &self.store_backend)
            .field("db_ip", &self.db_ip)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_pass", &"<redacted>")
            .field("db_pool_size", &self.db_pool_size)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("supabase_url", &self.supabase_url)
            .field("supabase_anon_key", &"<redacted>")
            .finish()
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            http_ip: String::from("127.0.0.1"),
            port: 8080,
            https_cert_path: None,
            https_key_path: None,
            log_level: default_log_level(),
            mmdb_url: None,
            store_backend: StoreBackend::Postgres,
            db_ip: String::from("127.0.0.1"),
            db_port: 5432,
            db_name: String::from("visitors"),
            db_user: String::from("postgres"),
            db_pass: String::from("THISISVERYBAD PLEASE CHANGE ME"),
            db_pool_size: 10,
            database_url: None,
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
        }
    }
}

impl Preferences {
    pub fn http_ip(&self) -> &str {
        self.http_ip.as_str()
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn https_cert_path(&self) -> &Option<String> {
        &self.https_cert_path
    }
    pub fn https_key_path(&self) -> &Option<String> {
        &self.https_key_path
    }
    pub fn log_level(&self) -> &str {
        self.log_level.as_str()
    }
    /// `None` when `log_level` isn't one of trace, debug, info, warn or error.
    pub fn tracing_level(&self) -> Option<Level> {
        Level::from_str(self.log_level.as_str()).ok()
    }
    pub fn store_backend(&self) -> StoreBackend {
        self.store_backend
    }
    pub fn db_pool_size(&self) -> u32 {
        self.db_pool_size
    }
    pub fn supabase_url(&self) -> &str {
        self.supabase_url.as_str()
    }
    pub fn supabase_anon_key(&self) -> &str {
        self.supabase_anon_key.as_str()
    }

    /// Base url of the geolocation lookup service, if one is configured.
    pub fn mmdb_url(&self) -> Result<Option<Url>, PrefError> {
        self.mmdb_url
            .as_deref()
            .map(|raw| Url::parse(raw).map_err(|err| PrefError::InvalidUrl("mmdb_url", err)))
            .transpose()
    }

    /// Connection string for the PostgreSQL store. `database_url` wins over the discrete fields.
    pub fn db_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.db_user, self.db_pass, self.db_ip, self.db_port, self.db_name
            ),
        }
    }

    pub fn load_config(path: &str) -> Result<Self, PrefError> {
        eprintln!("Config path is {}", path);
        let file_buff = match fs::read_to_string(path) {
            Ok(buff) => buff,
            Err(_) => return create_default_config(path),
        };
        Ok(toml::from_str(file_buff.as_str())?)
    }

    /// Overlays the deployment environment on top of the file values. `lookup` is
    /// `std::env::var(..).ok()` in production.
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MMDB_URL") {
            self.mmdb_url = Some(url);
        }
        if let Some(url) = lookup("SUPABASE_URL") {
            self.supabase_url = url;
        }
        if let Some(key) = lookup("SUPABASE_ANON_KEY") {
            self.supabase_anon_key = key;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }
        self
    }
}

fn create_default_config(path: &str) -> Result<Preferences, PrefError> {
    let new_pref = Preferences::default();
    eprintln!("Using default passwords. \x1b[1mTHIS MUST BE CHANGED!!!\x1b[0m");
    error!("Using default passwords. \x1b[1mTHIS MUST BE CHANGED!!!\x1b[0m");
    fs::write(path, toml::to_string(&new_pref)?)?;
    Ok(new_pref)
}
