// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::boundary::ResourceLimits;
use crate::pool::PoolConfig;

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory under which every unit gets its scratch directory
    pub sandbox_root: PathBuf,
    /// Maximum number of concurrently acquired units
    pub max_units: usize,
    /// Bounded wait for a free unit
    pub acquire_timeout: Duration,
    /// Timeout used when a request does not carry one
    pub default_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on timeout
    pub kill_grace: Duration,
    /// Cap on each captured output stream
    pub max_output_bytes: usize,
    /// Address-space limit in megabytes
    pub memory_limit_mb: Option<u64>,
    /// Open file descriptor limit
    pub max_open_files: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from(".data/sandbox"),
            max_units: 4,
            acquire_timeout: Duration::from_secs(30),
            default_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_millis(500),
            max_output_bytes: 64 * 1024,
            memory_limit_mb: None,
            max_open_files: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `TRELLIS_SANDBOX_ROOT`: scratch root (default: .data/sandbox)
    /// - `TRELLIS_MAX_UNITS`: pool bound (default: 4)
    /// - `TRELLIS_ACQUIRE_TIMEOUT_SECS`: bounded acquire wait (default: 30)
    /// - `TRELLIS_EXECUTION_TIMEOUT_SECS`: default execution timeout (default: 600)
    /// - `TRELLIS_KILL_GRACE_MS`: SIGTERM to SIGKILL grace (default: 500)
    /// - `TRELLIS_MAX_OUTPUT_BYTES`: cap per captured stream (default: 65536)
    /// - `TRELLIS_MEMORY_LIMIT_MB`: address-space limit (default: none)
    /// - `TRELLIS_MAX_OPEN_FILES`: open file limit (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sandbox_root = std::env::var("TRELLIS_SANDBOX_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.sandbox_root);

        let max_units: usize = parse_var("TRELLIS_MAX_UNITS", "must be a positive integer")?
            .unwrap_or(defaults.max_units);
        if max_units == 0 {
            return Err(ConfigError::Invalid(
                "TRELLIS_MAX_UNITS",
                "must be a positive integer",
            ));
        }

        let acquire_timeout = parse_var::<u64>(
            "TRELLIS_ACQUIRE_TIMEOUT_SECS",
            "must be a number of seconds",
        )?
        .map(Duration::from_secs)
        .unwrap_or(defaults.acquire_timeout);

        let default_timeout = parse_var::<u64>(
            "TRELLIS_EXECUTION_TIMEOUT_SECS",
            "must be a number of seconds",
        )?
        .map(Duration::from_secs)
        .unwrap_or(defaults.default_timeout);

        let kill_grace = parse_var::<u64>("TRELLIS_KILL_GRACE_MS", "must be a number of milliseconds")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.kill_grace);

        let max_output_bytes = parse_var("TRELLIS_MAX_OUTPUT_BYTES", "must be a byte count")?
            .unwrap_or(defaults.max_output_bytes);

        let memory_limit_mb = parse_var("TRELLIS_MEMORY_LIMIT_MB", "must be a number of megabytes")?;
        let max_open_files = parse_var("TRELLIS_MAX_OPEN_FILES", "must be a positive integer")?;

        Ok(Self {
            sandbox_root,
            max_units,
            acquire_timeout,
            default_timeout,
            kill_grace,
            max_output_bytes,
            memory_limit_mb,
            max_open_files,
        })
    }

    /// Pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            scratch_root: self.sandbox_root.clone(),
            max_units: self.max_units,
            acquire_timeout: self.acquire_timeout,
        }
    }

    /// Default resource limits derived from this configuration.
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            timeout: self.default_timeout,
            kill_grace: self.kill_grace,
            max_output_bytes: self.max_output_bytes,
            memory_bytes: self.memory_limit_mb.map(|mb| mb * 1024 * 1024),
            max_open_files: self.max_open_files,
            ..ResourceLimits::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &'static str,
    reason: &'static str,
) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(var, reason)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "TRELLIS_SANDBOX_ROOT",
        "TRELLIS_MAX_UNITS",
        "TRELLIS_ACQUIRE_TIMEOUT_SECS",
        "TRELLIS_EXECUTION_TIMEOUT_SECS",
        "TRELLIS_KILL_GRACE_MS",
        "TRELLIS_MAX_OUTPUT_BYTES",
        "TRELLIS_MEMORY_LIMIT_MB",
        "TRELLIS_MAX_OPEN_FILES",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for var in VARS {
                guard.remove(var);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new();

        let config = Config::from_env().unwrap();

        assert_eq!(config.sandbox_root, PathBuf::from(".data/sandbox"));
        assert_eq!(config.max_units, 4);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.default_timeout, Duration::from_secs(600));
        assert_eq!(config.kill_grace, Duration::from_millis(500));
        assert_eq!(config.max_output_bytes, 65536);
        assert!(config.memory_limit_mb.is_none());
        assert!(config.max_open_files.is_none());
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("TRELLIS_SANDBOX_ROOT", "/var/lib/trellis/units");
        guard.set("TRELLIS_MAX_UNITS", "16");
        guard.set("TRELLIS_ACQUIRE_TIMEOUT_SECS", "5");
        guard.set("TRELLIS_EXECUTION_TIMEOUT_SECS", "20");
        guard.set("TRELLIS_KILL_GRACE_MS", "100");
        guard.set("TRELLIS_MAX_OUTPUT_BYTES", "1024");
        guard.set("TRELLIS_MEMORY_LIMIT_MB", "256");
        guard.set("TRELLIS_MAX_OPEN_FILES", "64");

        let config = Config::from_env().unwrap();

        assert_eq!(config.sandbox_root, PathBuf::from("/var/lib/trellis/units"));
        assert_eq!(config.max_units, 16);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.default_timeout, Duration::from_secs(20));
        assert_eq!(config.kill_grace, Duration::from_millis(100));
        assert_eq!(config.max_output_bytes, 1024);
        assert_eq!(config.memory_limit_mb, Some(256));
        assert_eq!(config.max_open_files, Some(64));

        let limits = config.resource_limits();
        assert_eq!(limits.memory_bytes, Some(256 * 1024 * 1024));
        assert_eq!(limits.timeout, Duration::from_secs(20));

        let pool = config.pool_config();
        assert_eq!(pool.max_units, 16);
    }

    #[test]
    fn test_config_zero_units_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("TRELLIS_MAX_UNITS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("TRELLIS_MAX_UNITS", _)));
    }

    #[test]
    fn test_config_invalid_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("TRELLIS_EXECUTION_TIMEOUT_SECS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("TRELLIS_EXECUTION_TIMEOUT_SECS"));
    }
}
