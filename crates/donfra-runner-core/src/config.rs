//! Runtime configuration, read from the environment at process start.
//!
//! Every knob has a default; only `JAIL_IMAGE` is mandatory, and only when
//! the k8s jail mode is selected. Direct mode never touches the cluster or
//! broker settings.

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::errors::RunnerError;

/// How user code is isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JailMode {
    /// Child interpreter process with a deadline. Local development only.
    Direct,
    /// One Kubernetes Job per execution, results over Redis pub/sub.
    K8s,
}

impl FromStr for JailMode {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(JailMode::Direct),
            "k8s" => Ok(JailMode::K8s),
            other => Err(RunnerError::config(format!("unknown JAIL_MODE: {other}"))),
        }
    }
}

impl fmt::Display for JailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JailMode::Direct => write!(f, "direct"),
            JailMode::K8s => write!(f, "k8s"),
        }
    }
}

/// Dispatcher settings shared by both jail modes.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub jail_mode: JailMode,
    /// Limiter capacity.
    pub max_concurrent: usize,
    /// Applied when the request omits a timeout.
    pub default_timeout_ms: u64,
    /// Upper clamp on any requested timeout.
    pub max_timeout_ms: u64,
    /// Per-stream capture ceiling.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            jail_mode: JailMode::Direct,
            max_concurrent: 4,
            default_timeout_ms: 5_000,
            max_timeout_ms: 10_000,
            max_output_bytes: 65_536,
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self, RunnerError> {
        let jail_mode: JailMode = env_or("JAIL_MODE", "direct").parse()?;
        Ok(Self {
            jail_mode,
            max_concurrent: env_parse_or("MAX_CONCURRENT", 4),
            default_timeout_ms: env_parse_or("DEFAULT_TIMEOUT_MS", 5_000),
            max_timeout_ms: env_parse_or("MAX_TIMEOUT_MS", 10_000),
            max_output_bytes: env_parse_or("MAX_OUTPUT_BYTES", 65_536),
        })
    }
}

/// Cluster-mode settings. Only constructed when `JAIL_MODE=k8s`.
#[derive(Debug, Clone)]
pub struct K8sConfig {
    pub redis_addr: String,
    pub jail_image: String,
    pub namespace: String,
}

impl K8sConfig {
    pub fn from_env() -> Result<Self, RunnerError> {
        let jail_image = env::var("JAIL_IMAGE").unwrap_or_default();
        if jail_image.is_empty() {
            return Err(RunnerError::config("JAIL_IMAGE is required in k8s jail mode"));
        }
        Ok(Self {
            redis_addr: env_or("REDIS_ADDR", "redis:6379"),
            jail_image,
            namespace: env_or("K8S_NAMESPACE", "donfra-eng"),
        })
    }

    /// Splits the configured broker address into the host and port handed to
    /// the jail container. A bare host falls back to the default port.
    pub fn redis_host_port(&self) -> (String, String) {
        match self.redis_addr.split_once(':') {
            Some((host, port)) => (host.to_string(), port.to_string()),
            None => (self.redis_addr.clone(), "6379".to_string()),
        }
    }
}

/// Reads an environment variable, falling back when unset or empty.
pub fn env_or(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}

/// Reads and parses an environment variable, falling back when unset,
/// empty, or unparseable.
pub fn env_parse_or<T: FromStr>(key: &str, fallback: T) -> T {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jail_mode_parses_known_values() {
        assert_eq!("direct".parse::<JailMode>().unwrap(), JailMode::Direct);
        assert_eq!("k8s".parse::<JailMode>().unwrap(), JailMode::K8s);
        assert!("nsjail".parse::<JailMode>().is_err());
        assert!("".parse::<JailMode>().is_err());
    }

    #[test]
    fn redis_host_port_splits_addr() {
        let cfg = K8sConfig {
            redis_addr: "redis:6379".to_string(),
            jail_image: "jail:1".to_string(),
            namespace: "donfra-eng".to_string(),
        };
        assert_eq!(cfg.redis_host_port(), ("redis".to_string(), "6379".to_string()));
    }

    #[test]
    fn redis_host_port_defaults_port_for_bare_host() {
        let cfg = K8sConfig {
            redis_addr: "cache.internal".to_string(),
            jail_image: "jail:1".to_string(),
            namespace: "donfra-eng".to_string(),
        };
        assert_eq!(
            cfg.redis_host_port(),
            ("cache.internal".to_string(), "6379".to_string())
        );
    }

    #[test]
    fn env_or_falls_back_when_unset() {
        assert_eq!(env_or("DONFRA_TEST_UNSET_STR", "fallback"), "fallback");
    }

    #[test]
    fn env_parse_or_reads_and_falls_back() {
        env::set_var("DONFRA_TEST_PARSE_OK", "12");
        assert_eq!(env_parse_or("DONFRA_TEST_PARSE_OK", 4usize), 12);
        env::set_var("DONFRA_TEST_PARSE_BAD", "not-a-number");
        assert_eq!(env_parse_or("DONFRA_TEST_PARSE_BAD", 4usize), 4);
        assert_eq!(env_parse_or("DONFRA_TEST_PARSE_UNSET", 4usize), 4);
    }

    #[test]
    fn runner_config_defaults_match_contract() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.jail_mode, JailMode::Direct);
        assert_eq!(cfg.max_concurrent, 4);
        assert_eq!(cfg.default_timeout_ms, 5_000);
        assert_eq!(cfg.max_timeout_ms, 10_000);
        assert_eq!(cfg.max_output_bytes, 65_536);
    }
}
