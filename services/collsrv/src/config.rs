//! Service configuration
//!
//! One `AppConfig` is assembled in `main` (YAML file merged with
//! `COLLSRV_`-prefixed environment variables) and handed into component
//! constructors; there is no global configuration state.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// IEC-104 protocol parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iec104Params {
    /// Max unacknowledged I-frames we may have outstanding
    pub k: u16,
    /// Max received I-frames before an S-frame acknowledgement is forced
    pub w: u16,
    /// Connect timeout, seconds
    pub t0: u64,
    /// I/U frame acknowledgement timeout, seconds
    pub t1: u64,
    /// Receive-side delayed acknowledge, seconds
    pub t2: u64,
    /// Idle timeout before TESTFR, seconds
    pub t3: u64,
    /// Polling cycle interval, seconds
    pub coll_interval: u64,
    /// Append raw frames to the per-device frame log
    pub log_frame: bool,
}

impl Default for Iec104Params {
    fn default() -> Self {
        Self {
            k: 12,
            w: 8,
            t0: 30,
            t1: 15,
            t2: 10,
            t3: 20,
            coll_interval: 900,
            log_frame: true,
        }
    }
}

impl Iec104Params {
    pub fn t0(&self) -> Duration {
        Duration::from_secs(self.t0)
    }

    pub fn t1(&self) -> Duration {
        Duration::from_secs(self.t1)
    }

    pub fn t2(&self) -> Duration {
        Duration::from_secs(self.t2)
    }

    pub fn t3(&self) -> Duration {
        Duration::from_secs(self.t3)
    }

    pub fn coll_interval(&self) -> Duration {
        Duration::from_secs(self.coll_interval)
    }
}

/// HTTP control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the API listens on
    pub listen: String,
    /// Interactive call/ctrl reply deadline, seconds
    pub request_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            request_timeout: 10,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// Realtime store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/1".to_string(),
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub iec104: Iec104Params,
}

impl AppConfig {
    /// Load defaults, then the YAML file (if it exists), then environment
    /// overrides (`COLLSRV_IEC104__K=6` style).
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if path.exists() {
            figment = figment.merge(Yaml::file(path));
        }
        let config: AppConfig = figment
            .merge(Env::prefixed("COLLSRV_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_protocol_parameters() {
        let params = Iec104Params::default();
        assert_eq!(params.k, 12);
        assert_eq!(params.w, 8);
        assert_eq!(
            (params.t0, params.t1, params.t2, params.t3),
            (30, 15, 10, 20)
        );
        assert_eq!(params.coll_interval, 900);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/collsrv.yaml")).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.server.request_timeout, 10);
    }
}
