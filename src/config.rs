//! Marathon configuration loaded from `marathon.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! `ANTHROPIC_API_KEY` in the environment takes precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::corrections::DEFAULT_CONFIDENCE_DROP_THRESHOLD;
use crate::state_machine::{DEFAULT_AUTONOMY_FLOOR, DecisionPolicy};

pub const DEFAULT_CONFIG_PATH: &str = "marathon.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarathonConfig {
    /// Anthropic API key.
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,

    /// Seconds between scheduler passes.
    pub poll_interval_secs: u64,
    /// Maximum number of due processes picked up per pass.
    pub batch_size: usize,
    /// Upper bound on one reasoning call.
    pub reasoning_timeout_secs: u64,
    /// An in-progress claim older than this is considered abandoned.
    pub claim_timeout_secs: u64,

    pub autonomy_floor: f64,
    pub confidence_drop_threshold: f64,

    pub initial_delay_hours: i64,
    pub advance_delay_hours: i64,
    pub hold_delay_hours: i64,
    /// Retry delay after a failed step (unreachable service, worker error).
    pub failure_retry_minutes: i64,

    /// JSON snapshot of the process store.
    pub state_path: PathBuf,
    /// Root of the `<job>/<application>/<stage>.json` stage data tree.
    pub stage_data_dir: PathBuf,

    pub log_level: String,
    pub log_json: bool,
}

impl Default for MarathonConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 2048,
            poll_interval_secs: 60,
            batch_size: 10,
            reasoning_timeout_secs: 120,
            claim_timeout_secs: 600,
            autonomy_floor: DEFAULT_AUTONOMY_FLOOR,
            confidence_drop_threshold: DEFAULT_CONFIDENCE_DROP_THRESHOLD,
            initial_delay_hours: 1,
            advance_delay_hours: 24,
            hold_delay_hours: 72,
            failure_retry_minutes: 60,
            state_path: PathBuf::from("marathon-state.json"),
            stage_data_dir: PathBuf::from("stage-data"),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl MarathonConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<MarathonConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.autonomy_floor) {
            bail!("autonomy_floor must be within [0, 1], got {}", self.autonomy_floor);
        }
        if !(0.0..=1.0).contains(&self.confidence_drop_threshold) {
            bail!(
                "confidence_drop_threshold must be within [0, 1], got {}",
                self.confidence_drop_threshold
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.poll_interval_secs == 0 || self.reasoning_timeout_secs == 0 {
            bail!("poll_interval_secs and reasoning_timeout_secs must be positive");
        }
        if self.advance_delay_hours < 0
            || self.hold_delay_hours < 0
            || self.initial_delay_hours < 0
            || self.failure_retry_minutes < 0
        {
            bail!("scheduling delays must not be negative");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning_timeout_secs)
    }

    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_timeout_secs as i64)
    }

    pub fn initial_delay(&self) -> chrono::Duration {
        chrono::Duration::hours(self.initial_delay_hours)
    }

    pub fn failure_retry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.failure_retry_minutes)
    }

    pub fn policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            autonomy_floor: self.autonomy_floor,
            advance_delay: chrono::Duration::hours(self.advance_delay_hours),
            hold_delay: chrono::Duration::hours(self.hold_delay_hours),
        }
    }
}
