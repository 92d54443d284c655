use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub execution: ExecutionConfig,
    pub manager: ManagerConfig,
    pub bandit: BanditConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TASKGRID_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TASKGRID_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            execution: ExecutionConfig::from_env_profiled(p),
            manager: ManagerConfig::from_env_profiled(p),
            bandit: BanditConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  execution:   worker_threads={}, poll_interval={}ms",
            self.execution.resolved_worker_threads(),
            self.execution.poll_interval_ms
        );
        tracing::info!(
            "  manager:     data_dir={}, endpoint={}:{}, sync_interval={}s",
            self.manager.data_dir.display(),
            self.manager.host,
            self.manager.port,
            self.manager.sync_interval_secs
        );
        tracing::info!(
            "  bandit:      max_in_flight={}, report_size={}, exploration={}",
            self.bandit.max_in_flight,
            self.bandit.report_size,
            self.bandit.exploration_coefficient
        );
    }
}

// ── Execution ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default)]
    pub worker_threads: usize,
    /// Sleep between two drains of the notification queue while waiting.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 { 10 }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ExecutionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_threads: profiled_env_parse(p, "WORKER_THREADS", 0),
            poll_interval_ms: profiled_env_parse(p, "POLL_INTERVAL_MS", default_poll_interval_ms()),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ── Manager ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Root directory holding one sub-directory per project.
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Interval between two status reconciliation passes.
    pub sync_interval_secs: u64,
    /// Reply timeout for manager round trips.
    pub request_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/manager"),
            host: "127.0.0.1".to_string(),
            port: 1664,
            sync_interval_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl ManagerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "MANAGER_DATA_DIR", "data/manager")),
            host: profiled_env_or(p, "MANAGER_HOST", &defaults.host),
            port: profiled_env_parse(p, "MANAGER_PORT", defaults.port),
            sync_interval_secs: profiled_env_parse(p, "MANAGER_SYNC_INTERVAL_SECS", defaults.sync_interval_secs),
            request_timeout_secs: profiled_env_parse(
                p,
                "MANAGER_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Bandit ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    /// Cap on concurrently in-flight evaluations under a worker pool.
    pub max_in_flight: usize,
    /// Number of arms listed at each end of an iteration report.
    pub report_size: usize,
    pub exploration_coefficient: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            report_size: 5,
            exploration_coefficient: 1.0,
        }
    }
}

impl BanditConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            max_in_flight: profiled_env_parse(p, "BANDIT_MAX_IN_FLIGHT", defaults.max_in_flight),
            report_size: profiled_env_parse(p, "BANDIT_REPORT_SIZE", defaults.report_size),
            exploration_coefficient: profiled_env_parse(
                p,
                "BANDIT_EXPLORATION",
                defaults.exploration_coefficient,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn resolved_worker_threads() {
        let mut config = ExecutionConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_worker_threads() > 0);

        config.worker_threads = 8;
        assert_eq!(config.resolved_worker_threads(), 8);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = ExecutionConfig { worker_threads: 1, poll_interval_ms: 0 };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn manager_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("data/manager"));
        assert_eq!(config.port, 1664);
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn bandit_defaults() {
        let config = BanditConfig::default();
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.report_size, 5);
    }

    #[test]
    fn profile_label_defaults() {
        let config = Config::default();
        assert_eq!(config.profile_label(), "default");
    }

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        // Unique key names keep this test independent from the process env.
        env::set_var("TGTEST_PROFILED_KEY", "plain");
        env::set_var("QA_TGTEST_PROFILED_KEY", "prefixed");
        assert_eq!(profiled_env_or("QA", "TGTEST_PROFILED_KEY", "x"), "prefixed");
        assert_eq!(profiled_env_or("", "TGTEST_PROFILED_KEY", "x"), "plain");
        assert_eq!(profiled_env_or("QA", "TGTEST_MISSING_KEY", "x"), "x");
    }

    #[test]
    fn config_serializes() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["manager"]["port"], 1664);
        assert_eq!(json["bandit"]["report_size"], 5);
    }
}
