use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub mod cors;

pub use cors::create_cors_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/gathering";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_FRONTEND_URLS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    pub sweep_interval: Duration,
    pub frontend_urls: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or malformed values fall
    /// back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let sweep_secs = parse_or(&lookup, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS);
        let frontend_urls = lookup("FRONTEND_URLS")
            .unwrap_or_else(|| DEFAULT_FRONTEND_URLS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            bind_addr: parse_or(
                &lookup,
                "BIND_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 3001)),
            ),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            frontend_urls,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Config: invalid value '{}' for {}, using default", raw, key);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:3001");
        assert_eq!(cfg.sweep_interval, Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
        assert_eq!(cfg.frontend_urls.len(), 2);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://db/events"),
            ("DATABASE_MAX_CONNECTIONS", "20"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("SWEEP_INTERVAL_SECS", "60"),
            ("FRONTEND_URLS", "https://app.example.org, ,https://admin.example.org"),
        ]);
        assert_eq!(cfg.database_url, "postgres://db/events");
        assert_eq!(cfg.max_connections, 20);
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(
            cfg.frontend_urls,
            vec!["https://app.example.org", "https://admin.example.org"]
        );
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let cfg = config(&[
            ("DATABASE_MAX_CONNECTIONS", "many"),
            ("SWEEP_INTERVAL_SECS", "-5"),
        ]);
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
    }
}
