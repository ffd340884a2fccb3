//! Per-tenant worker configuration.
//!
//! Each slot has one JSON artifact in the tenant directory
//! (`bot1-config.json` ...). Reads never fail: a missing or corrupt artifact
//! degrades to the slot's preset. At start time the record is rendered into
//! the `KEY=value` file the worker process reads.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::HubError;
use crate::subprocess::SlotId;

pub const DEFAULT_TOKEN_ADDRESS: &str = "CV9oNz7rjTqCsWHHgqWhoZaaw1LSX96H81Vk5p94Hc2E";
pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

const PLACEHOLDER_KEYS: &[&str] = &[
    "REPLACE_WITH_YOUR_ACTUAL_PRIVATE_KEY",
    "your_private_key_here",
    "your_actual_private_key_here",
];

static RE_BASE58_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{87,88}$").unwrap());
static RE_BYTE_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+,\d+").unwrap());

/// Named configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Balanced,
    Aggressive,
    Conservative,
}

impl Preset {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Balanced => "Balanced Bot",
            Self::Aggressive => "Aggressive Bot",
            Self::Conservative => "Conservative Bot",
        }
    }
}

/// Persisted worker configuration. Numeric fields are kept as the strings
/// the dashboard submits; [`WorkerConfig::check_numbers`] enforces shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub name: String,
    pub strategy: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub token_address: String,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub sol_amount_min: String,
    #[serde(default)]
    pub sol_amount_max: String,
    #[serde(default)]
    pub trade_interval_min: String,
    #[serde(default)]
    pub trade_interval_max: String,
    #[serde(default)]
    pub buy_percentage: String,
    #[serde(default)]
    pub max_slippage: String,
    #[serde(default)]
    pub min_sol_balance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Fields supplied by a save request. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub name: Option<String>,
    pub strategy: Option<String>,
    pub private_key: Option<String>,
    pub token_address: Option<String>,
    pub rpc_url: Option<String>,
    pub sol_amount_min: Option<String>,
    pub sol_amount_max: Option<String>,
    pub trade_interval_min: Option<String>,
    pub trade_interval_max: Option<String>,
    pub buy_percentage: Option<String>,
    pub max_slippage: Option<String>,
    pub min_sol_balance: Option<String>,
}

/// Outcome of [`ConfigStore::validate_for_start`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Return one of the three fixed presets. Pure.
pub fn default_config(preset: Preset) -> WorkerConfig {
    let (strategy, amount, interval, buy, slippage, reserve) = match preset {
        Preset::Balanced => (
            "Balanced (60% buy, 40% sell)",
            ("0.0001", "0.001"),
            ("60", "180"),
            "60",
            "0.05",
            "0.02",
        ),
        Preset::Aggressive => (
            "Aggressive (75% buy, 25% sell)",
            ("0.001", "0.01"),
            ("30", "120"),
            "75",
            "0.08",
            "0.05",
        ),
        Preset::Conservative => (
            "Conservative (55% buy, 45% sell)",
            ("0.0001", "0.0005"),
            ("120", "300"),
            "55",
            "0.03",
            "0.01",
        ),
    };

    WorkerConfig {
        name: preset.display_name().to_string(),
        strategy: strategy.to_string(),
        private_key: String::new(),
        token_address: DEFAULT_TOKEN_ADDRESS.to_string(),
        rpc_url: DEFAULT_RPC_URL.to_string(),
        sol_amount_min: amount.0.to_string(),
        sol_amount_max: amount.1.to_string(),
        trade_interval_min: interval.0.to_string(),
        trade_interval_max: interval.1.to_string(),
        buy_percentage: buy.to_string(),
        max_slippage: slippage.to_string(),
        min_sol_balance: reserve.to_string(),
        last_updated: None,
    }
}

impl WorkerConfig {
    /// Overlay every field present in `patch`.
    pub fn apply(&mut self, patch: ConfigPatch) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = patch.$field {
                    self.$field = v.trim().to_string();
                })*
            };
        }
        overlay!(
            name,
            strategy,
            private_key,
            token_address,
            rpc_url,
            sol_amount_min,
            sol_amount_max,
            trade_interval_min,
            trade_interval_max,
            buy_percentage,
            max_slippage,
            min_sol_balance,
        );
    }

    /// Numeric sanity of the tunables. Empty values are allowed (the worker
    /// falls back to its own defaults).
    pub fn check_numbers(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut number = |label: &str, raw: &str| -> Option<f64> {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
                _ => {
                    errors.push(format!("{label} must be a non-negative number"));
                    None
                }
            }
        };

        let amount_min = number("SOL amount min", &self.sol_amount_min);
        let amount_max = number("SOL amount max", &self.sol_amount_max);
        let interval_min = number("Trade interval min", &self.trade_interval_min);
        let interval_max = number("Trade interval max", &self.trade_interval_max);
        let buy = number("Buy percentage", &self.buy_percentage);
        number("Max slippage", &self.max_slippage);
        number("Min SOL balance", &self.min_sol_balance);

        if let (Some(lo), Some(hi)) = (amount_min, amount_max) {
            if lo > hi {
                errors.push("SOL amount min must not exceed SOL amount max".to_string());
            }
        }
        if let (Some(lo), Some(hi)) = (interval_min, interval_max) {
            if lo > hi {
                errors.push("Trade interval min must not exceed trade interval max".to_string());
            }
        }
        if let Some(b) = buy {
            if b > 100.0 {
                errors.push("Buy percentage must be between 0 and 100".to_string());
            }
        }

        errors
    }

    /// Render the `KEY=value` file the worker consumes.
    pub fn to_env(&self) -> String {
        fn or<'a>(v: &'a str, fallback: &'a str) -> &'a str {
            if v.trim().is_empty() { fallback } else { v }
        }

        format!(
            "# Generated from JSON configuration\n\
             PRIVATE_KEY={}\n\
             TOKEN_ADDRESS={}\n\
             RPC_URL={}\n\
             SOL_AMOUNT_MIN={}\n\
             SOL_AMOUNT_MAX={}\n\
             TRADE_INTERVAL_MIN={}\n\
             TRADE_INTERVAL_MAX={}\n\
             BUY_PERCENTAGE={}\n\
             MAX_SLIPPAGE={}\n\
             MIN_SOL_BALANCE={}\n",
            self.private_key,
            or(&self.token_address, DEFAULT_TOKEN_ADDRESS),
            or(&self.rpc_url, DEFAULT_RPC_URL),
            or(&self.sol_amount_min, "0.001"),
            or(&self.sol_amount_max, "0.01"),
            or(&self.trade_interval_min, "30"),
            or(&self.trade_interval_max, "300"),
            or(&self.buy_percentage, "60"),
            or(&self.max_slippage, "0.05"),
            or(&self.min_sol_balance, "0.1"),
        )
    }
}

/// Check credential presence and shape plus the target asset. Every violated
/// rule is reported.
pub fn start_violations(config: &WorkerConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let pk = config.private_key.trim();

    if pk.is_empty() {
        errors.push("Private key is required".to_string());
    }
    if config.token_address.trim().is_empty() {
        errors.push("Token address is required".to_string());
    }

    if !pk.is_empty() {
        if PLACEHOLDER_KEYS.contains(&pk) {
            errors.push("Please replace the placeholder with your actual private key".to_string());
        }

        let is_base58 = RE_BASE58_KEY.is_match(pk);
        let is_byte_list = RE_BYTE_LIST.is_match(pk) && pk.split(',').count() >= 32;
        if !is_base58 && !is_byte_list {
            errors.push("Private key must be in Base58 format or comma-separated bytes".to_string());
        }
    }

    errors
}

/// Configuration artifacts of one tenant.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn config_path(&self, slot: SlotId) -> PathBuf {
        self.dir.join(format!("{slot}-config.json"))
    }

    /// Path of the materialized worker file for `slot`.
    pub fn env_path(&self, slot: SlotId) -> PathBuf {
        self.dir.join(format!("{slot}.env"))
    }

    /// Write the slot presets where no artifact exists yet. Idempotent.
    pub fn seed_defaults(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        for slot in SlotId::ALL {
            let path = self.config_path(slot);
            if !path.exists() {
                let mut cfg = default_config(slot.preset());
                cfg.last_updated = Some(chrono::Utc::now().to_rfc3339());
                write_atomic(&path, serde_json::to_string_pretty(&cfg)?.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Persisted configuration, or the slot preset when the artifact is
    /// missing or unreadable.
    pub fn load(&self, slot: SlotId) -> WorkerConfig {
        let path = self.config_path(slot);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("config {} unreadable, using preset: {e}", path.display());
                }
                return default_config(slot.preset());
            }
        };
        match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("config {} corrupt, using preset: {e}", path.display());
                default_config(slot.preset())
            }
        }
    }

    /// Merge `patch` over the stored record, stamp it and persist.
    pub fn save(&self, slot: SlotId, patch: ConfigPatch) -> Result<WorkerConfig, HubError> {
        let mut cfg = self.load(slot);
        cfg.apply(patch);

        let errors = cfg.check_numbers();
        if !errors.is_empty() {
            return Err(HubError::Validation(errors));
        }

        cfg.last_updated = Some(chrono::Utc::now().to_rfc3339());
        write_atomic(&self.config_path(slot), serde_json::to_string_pretty(&cfg)?.as_bytes())?;
        Ok(cfg)
    }

    pub fn validate_for_start(&self, slot: SlotId) -> ValidationReport {
        let config = self.load(slot);
        let errors = start_violations(&config);
        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Write the worker file for `slot` and return its absolute path.
    pub fn materialize_for_worker(&self, slot: SlotId) -> io::Result<PathBuf> {
        let path = std::path::absolute(self.env_path(slot))?;
        fs::write(&path, self.load(slot).to_env())?;
        Ok(path)
    }

    /// Remove the materialized worker file; missing files are fine.
    pub fn discard_materialized(&self, slot: SlotId) {
        let path = self.env_path(slot);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::debug!("could not remove {}: {e}", path.display());
            }
        }
    }

    /// Remove everything this store owns. Idempotent.
    pub fn purge(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Atomic write: write to temp, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_BASE58: &str = "4YDtkEXhiD8o5zhUsD1ve3pNJra4YDtkEXhiD8o5zhUsD1ve3pNJra4YDtkEXhiD8o5zhUsD1ve3pNJra4YDtkE";

    fn byte_list(n: usize) -> String {
        (0..n).map(|i| (i % 256).to_string()).collect::<Vec<_>>().join(",")
    }

    #[test]
    fn presets_differ_in_tunables() {
        let balanced = default_config(Preset::Balanced);
        let aggressive = default_config(Preset::Aggressive);
        let conservative = default_config(Preset::Conservative);

        assert_eq!(balanced.buy_percentage, "60");
        assert_eq!(aggressive.buy_percentage, "75");
        assert_eq!(conservative.buy_percentage, "55");
        assert_eq!(aggressive.max_slippage, "0.08");
        assert_eq!(conservative.trade_interval_max, "300");
        assert!(balanced.private_key.is_empty());
        assert!(balanced.check_numbers().is_empty());
    }

    #[test]
    fn fresh_tenant_fails_start_validation_on_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.seed_defaults().unwrap();

        let report = store.validate_for_start(SlotId::Bot1);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e == "Private key is required"));
    }

    #[test]
    fn validation_reports_every_violation() {
        let mut cfg = default_config(Preset::Balanced);
        cfg.private_key = "your_private_key_here".to_string();
        cfg.token_address = "  ".to_string();

        let errors = start_violations(&cfg);
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("Token address")));
        assert!(errors.iter().any(|e| e.contains("placeholder")));
        assert!(errors.iter().any(|e| e.contains("Base58")));
    }

    #[test]
    fn accepted_credential_shapes() {
        let mut cfg = default_config(Preset::Balanced);

        cfg.private_key = VALID_BASE58.to_string();
        assert!(start_violations(&cfg).is_empty());

        cfg.private_key = byte_list(64);
        assert!(start_violations(&cfg).is_empty());

        cfg.private_key = byte_list(31);
        assert_eq!(start_violations(&cfg).len(), 1);

        // '0', 'O', 'I' and 'l' are outside the Base58 alphabet.
        cfg.private_key = VALID_BASE58.replacen('4', "0", 1);
        assert_eq!(start_violations(&cfg).len(), 1);
    }

    #[test]
    fn save_merges_over_existing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.seed_defaults().unwrap();

        store
            .save(
                SlotId::Bot1,
                ConfigPatch {
                    buy_percentage: Some("70".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let merged = store
            .save(
                SlotId::Bot1,
                ConfigPatch {
                    token_address: Some("X".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let loaded = store.load(SlotId::Bot1);
        assert_eq!(loaded, merged);
        assert_eq!(loaded.token_address, "X");
        assert_eq!(loaded.buy_percentage, "70");
        assert_eq!(loaded.rpc_url, DEFAULT_RPC_URL);
        assert!(loaded.last_updated.is_some());
    }

    #[test]
    fn save_rejects_inverted_bounds_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.seed_defaults().unwrap();

        let err = store
            .save(
                SlotId::Bot2,
                ConfigPatch {
                    sol_amount_min: Some("5".into()),
                    buy_percentage: Some("abc".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            HubError::Validation(errors) => assert_eq!(errors.len(), 2, "{errors:?}"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.load(SlotId::Bot2).sol_amount_min, "0.001");
    }

    #[test]
    fn corrupt_or_missing_config_degrades_to_preset() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());

        assert_eq!(store.load(SlotId::Bot3), default_config(Preset::Conservative));

        fs::write(dir.path().join("bot3-config.json"), "{ not json").unwrap();
        assert_eq!(store.load(SlotId::Bot3), default_config(Preset::Conservative));
    }

    #[test]
    fn seed_defaults_keeps_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.seed_defaults().unwrap();
        store
            .save(
                SlotId::Bot1,
                ConfigPatch {
                    name: Some("Mine".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        store.seed_defaults().unwrap();
        assert_eq!(store.load(SlotId::Bot1).name, "Mine");
    }

    #[test]
    fn materialized_file_has_required_keys_and_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.seed_defaults().unwrap();
        store
            .save(
                SlotId::Bot1,
                ConfigPatch {
                    private_key: Some(VALID_BASE58.into()),
                    min_sol_balance: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();

        let path = store.materialize_for_worker(SlotId::Bot1).unwrap();
        assert!(path.is_absolute());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(&format!("PRIVATE_KEY={VALID_BASE58}\n")));
        assert!(text.contains(&format!("TOKEN_ADDRESS={DEFAULT_TOKEN_ADDRESS}\n")));
        assert!(text.contains("BUY_PERCENTAGE=60\n"));
        assert!(text.contains("MIN_SOL_BALANCE=0.1\n"));

        store.discard_materialized(SlotId::Bot1);
        assert!(!path.exists());
        store.discard_materialized(SlotId::Bot1);
    }

    #[test]
    fn purge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("tenant"));
        store.seed_defaults().unwrap();
        store.purge().unwrap();
        assert!(!store.dir().exists());
        store.purge().unwrap();
    }
}
