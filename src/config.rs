use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DEFAULT_BACKOFF_SECS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub google_maps_api_key: Option<SecretString>,
    pub geocode_endpoint: String,
    pub geocode_timeout_secs: u64,
    pub geocode_max_attempts: u32,
    pub geocode_rate_limit_qps: u32,
    pub geocode_backoff_secs: u64,
    pub location_cache_enabled: bool,
    pub data_dir: PathBuf,
    pub database_file_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocode_endpoint: String,
    pub geocode_timeout_secs: u64,
    pub geocode_max_attempts: u32,
    pub geocode_rate_limit_qps: u32,
    pub geocode_backoff_secs: u64,
    pub location_cache_enabled: bool,
    pub data_dir: String,
    pub database_file_name: String,
    pub has_google_maps_key: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            google_maps_api_key: None,
            geocode_endpoint: DEFAULT_GEOCODE_ENDPOINT.to_string(),
            geocode_timeout_secs: 10,
            geocode_max_attempts: 3,
            geocode_rate_limit_qps: 10,
            geocode_backoff_secs: DEFAULT_BACKOFF_SECS,
            location_cache_enabled: true,
            data_dir: PathBuf::from("data"),
            database_file_name: "location-cache.db".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocode_endpoint: env::var("GEOCODE_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.geocode_endpoint),
            geocode_timeout_secs: parse_u64("GEOCODE_TIMEOUT_SECS", defaults.geocode_timeout_secs)
                .max(1),
            geocode_max_attempts: parse_u32("GEOCODE_MAX_ATTEMPTS", defaults.geocode_max_attempts)
                .max(1),
            geocode_rate_limit_qps: parse_u32(
                "GEOCODE_RATE_LIMIT_QPS",
                defaults.geocode_rate_limit_qps,
            )
            .max(1),
            geocode_backoff_secs: parse_u64("GEOCODE_BACKOFF_SECS", defaults.geocode_backoff_secs),
            location_cache_enabled: parse_bool(
                "LOCATION_CACHE_ENABLED",
                defaults.location_cache_enabled,
            ),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or(defaults.database_file_name),
        }
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }

    pub fn backoff_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.geocode_backoff_secs.min(i64::MAX as u64) as i64)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocode_endpoint: self.geocode_endpoint.clone(),
            geocode_timeout_secs: self.geocode_timeout_secs,
            geocode_max_attempts: self.geocode_max_attempts,
            geocode_rate_limit_qps: self.geocode_rate_limit_qps,
            geocode_backoff_secs: self.geocode_backoff_secs,
            location_cache_enabled: self.location_cache_enabled,
            data_dir: self.data_dir.to_string_lossy().to_string(),
            database_file_name: self.database_file_name.clone(),
            has_google_maps_key: self.google_maps_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GOOGLE_MAPS_API_KEY", "secret");
        env::set_var("DATABASE_FILE_NAME", "custom.db");
        env::set_var("LOCATION_CACHE_ENABLED", "false");
        env::set_var("GEOCODE_MAX_ATTEMPTS", "0");
        env::set_var("GEOCODE_BACKOFF_SECS", "60");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_file_name, "custom.db");
        assert!(!public.location_cache_enabled);
        assert!(public.has_google_maps_key);
        assert!(config.google_maps_api_key.is_some());
        assert_eq!(public.geocode_max_attempts, 1);
        assert_eq!(config.backoff_window(), chrono::Duration::seconds(60));
        assert_eq!(public.geocode_endpoint, DEFAULT_GEOCODE_ENDPOINT);

        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret"));
    }

    #[test]
    fn default_backoff_is_one_day() {
        let config = AppConfig::default();
        assert_eq!(config.backoff_window(), chrono::Duration::hours(24));
        assert!(config.location_cache_enabled);
    }
}
