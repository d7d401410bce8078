use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_WATCH_INTERVAL_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub cache_path: Option<PathBuf>,
    pub watch_file: Option<PathBuf>,
    pub watch_interval: Duration,
    pub insecure_ssl: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_raw = var("PRINTWRAP_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "PRINTWRAP_BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let watch_interval = match var("PRINTWRAP_WATCH_INTERVAL_MS") {
            Some(raw) => {
                let parsed = raw.trim().parse::<u64>();
                match parsed {
                    Ok(ms) if ms > 0 => Duration::from_millis(ms),
                    _ => {
                        return Err(ConfigError::Invalid { name: "PRINTWRAP_WATCH_INTERVAL_MS", value: raw })
                    }
                }
            }
            None => Duration::from_millis(DEFAULT_WATCH_INTERVAL_MS),
        };

        Ok(Config {
            bind_addr,
            cache_path: var("PRINTWRAP_CACHE_PATH").map(PathBuf::from),
            watch_file: var("PRINTWRAP_WATCH_FILE").map(PathBuf::from),
            watch_interval,
            insecure_ssl: var("PRINTWRAP_INSECURE_SSL").as_deref() == Some("1"),
        })
    }
}
