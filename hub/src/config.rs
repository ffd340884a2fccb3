use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Hub configuration derived from environment variables.
///
/// Every variable is optional; malformed values fall back to the default
/// instead of aborting startup.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,

    // ── Storage ────────────────────────────────────────────────────
    /// Root holding one exclusively-owned directory per tenant.
    pub data_dir: PathBuf,
    /// Static assets of the dashboard frontend.
    pub public_dir: PathBuf,
    /// Wipe `data_dir` at boot.
    pub clear_data_on_startup: bool,

    // ── Worker process ─────────────────────────────────────────────
    pub worker_program: String,
    /// Leading arguments; the materialized config path is appended last.
    pub worker_args: Vec<String>,
    pub start_timeout: Duration,
    /// Grace period before a stopped worker is force-killed. `None` ⇒ never.
    pub stop_grace: Option<Duration>,

    // ── Sessions ───────────────────────────────────────────────────
    pub session_max_age: Duration,
    pub session_max_idle: Duration,
    pub secure_cookies: bool,

    // ── Reclamation sweeps ─────────────────────────────────────────
    pub session_sweep_every: Duration,
    pub orphan_sweep_every: Duration,
    pub supervisor_sweep_every: Duration,
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
        .unwrap_or(default)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    PathBuf::from(env_str(name, default))
}

/// `--clear-data` among the program arguments (argv[0] excluded).
fn has_clear_data_flag(args: impl IntoIterator<Item = String>) -> bool {
    args.into_iter().skip(1).any(|a| a == "--clear-data")
}

fn env_secs(name: &str, default: u64) -> Duration {
    // Zero-length periods would spin the sweep loops.
    Duration::from_secs(env_u64(name, default).max(1))
}

impl HubConfig {
    pub fn from_env() -> Self {
        let worker_args = env_str("BOTDECK_WORKER_ARGS", "src/index.js")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let stop_grace_ms = env_u64("BOTDECK_STOP_GRACE_MS", 0);

        let clear_data_on_startup =
            env_bool("BOTDECK_CLEAR_DATA_ON_STARTUP", false) || has_clear_data_flag(env::args());

        Self {
            bind: env_str("BOTDECK_BIND", "127.0.0.1"),
            port: env_u16("BOTDECK_PORT", 3000),
            data_dir: env_path("BOTDECK_DATA_DIR", "user_data"),
            public_dir: env_path("BOTDECK_PUBLIC_DIR", "public"),
            clear_data_on_startup,
            worker_program: env_str("BOTDECK_WORKER_PROGRAM", "node"),
            worker_args,
            start_timeout: Duration::from_millis(env_u64("BOTDECK_START_TIMEOUT_MS", 10_000).max(1)),
            stop_grace: (stop_grace_ms > 0).then(|| Duration::from_millis(stop_grace_ms)),
            session_max_age: env_secs("BOTDECK_SESSION_MAX_AGE_SECS", 24 * 60 * 60),
            session_max_idle: env_secs("BOTDECK_SESSION_MAX_IDLE_SECS", 2 * 60 * 60),
            secure_cookies: env_bool("BOTDECK_SECURE_COOKIES", false),
            session_sweep_every: env_secs("BOTDECK_SESSION_SWEEP_SECS", 60 * 60),
            orphan_sweep_every: env_secs("BOTDECK_ORPHAN_SWEEP_SECS", 10 * 60),
            supervisor_sweep_every: env_secs("BOTDECK_SUPERVISOR_SWEEP_SECS", 5 * 60),
        }
    }

    /// Configuration rooted at `data_dir` with every other field at its
    /// default. Used by tests and tooling that never touch the environment.
    #[cfg(test)]
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 0,
            data_dir: data_dir.into(),
            public_dir: PathBuf::from("public"),
            clear_data_on_startup: false,
            worker_program: "node".to_string(),
            worker_args: vec!["src/index.js".to_string()],
            start_timeout: Duration::from_secs(10),
            stop_grace: None,
            session_max_age: Duration::from_secs(24 * 60 * 60),
            session_max_idle: Duration::from_secs(2 * 60 * 60),
            secure_cookies: false,
            session_sweep_every: Duration::from_secs(60 * 60),
            orphan_sweep_every: Duration::from_secs(10 * 60),
            supervisor_sweep_every: Duration::from_secs(5 * 60),
        }
    }
}
