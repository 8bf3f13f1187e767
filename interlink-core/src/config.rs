//! Harness configuration: TOML file, `INTERLINK_*` overrides, defaults.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const ASSETS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets");

/// Harness-wide settings. Every field has a default so partial files load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Default tracing level when `RUST_LOG` is unset.
    pub log_level: String,
    /// First port handed out by the allocator.
    pub base_port: u16,
    /// Parent directory for per-node working directories.
    pub tmp_root: PathBuf,
    /// Epoch `sys.config` template with `CONF_*` tokens.
    pub template_path: PathBuf,
    /// Genesis accounts copied into every Epoch node.
    pub genesis_accounts_path: PathBuf,
    /// Epoch launcher settings.
    pub epoch: EpochSettings,
    /// Elixir launcher settings.
    pub elixir: ElixirSettings,
    /// Console query settings shared by both drivers.
    pub repl: ReplSettings,
}

/// Settings for nodes started with `rebar3 shell`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EpochSettings {
    /// Epoch checkout the launcher runs in.
    pub build_path: PathBuf,
    /// Shell launcher, resolved relative to `build_path`.
    pub shell: String,
    /// Limit for the readiness line to appear.
    pub startup_timeout_ms: u64,
}

/// Settings for nodes started with `iex -S mix`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ElixirSettings {
    /// Mix project the console runs in.
    pub build_path: PathBuf,
    /// Interactive shell program, looked up on `PATH` unless absolute.
    pub program: String,
    /// Limit for each of the two startup prompts.
    pub prompt_timeout_ms: u64,
}

/// Timing of console round-trips.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplSettings {
    /// Upper bound for a single query round-trip.
    pub query_timeout_ms: u64,
    /// Silence window that ends a drain of pending output.
    pub quiet_period_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            base_port: 8000,
            tmp_root: PathBuf::from("/tmp"),
            template_path: Path::new(ASSETS_DIR).join("epoch_config_template.config"),
            genesis_accounts_path: Path::new(ASSETS_DIR).join("accounts.json"),
            epoch: EpochSettings::default(),
            elixir: ElixirSettings::default(),
            repl: ReplSettings::default(),
        }
    }
}

impl Default for EpochSettings {
    fn default() -> Self {
        Self {
            build_path: PathBuf::from("epoch"),
            shell: "rebar3".into(),
            startup_timeout_ms: 10_000,
        }
    }
}

impl Default for ElixirSettings {
    fn default() -> Self {
        Self {
            build_path: PathBuf::from("."),
            program: "iex".into(),
            prompt_timeout_ms: 2_000,
        }
    }
}

impl Default for ReplSettings {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
            quiet_period_ms: 50,
        }
    }
}

impl EpochSettings {
    /// `startup_timeout_ms` as a [`Duration`].
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl ElixirSettings {
    /// `prompt_timeout_ms` as a [`Duration`].
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }
}

impl ReplSettings {
    /// `query_timeout_ms` as a [`Duration`].
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// `quiet_period_ms` as a [`Duration`].
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl HarnessConfig {
    /// Parses and validates a TOML file. Missing keys take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&data)
            .map_err(|e| HarnessError::config(format!("toml parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with the environment, validated.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlays `INTERLINK_*` environment variables onto the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("INTERLINK_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("INTERLINK_BASE_PORT") {
            self.base_port = v
                .trim()
                .parse()
                .map_err(|e| HarnessError::config(format!("INTERLINK_BASE_PORT: {e}")))?;
        }
        if let Ok(v) = std::env::var("INTERLINK_TMP_ROOT") {
            self.tmp_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INTERLINK_EPOCH_BUILD") {
            self.epoch.build_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INTERLINK_ELIXIR_BUILD") {
            self.elixir.build_path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Rejects unknown log levels, a zero base port, zero timeouts and empty launcher names.
    pub fn validate(&self) -> Result<()> {
        let allowed = ["trace", "debug", "info", "warn", "error"];
        if !allowed.contains(&self.log_level.as_str()) {
            return Err(HarnessError::config(format!(
                "invalid log_level: {}",
                self.log_level
            )));
        }
        if self.base_port == 0 {
            return Err(HarnessError::config("base_port must be non-zero"));
        }
        let timeouts = [
            ("epoch.startup_timeout_ms", self.epoch.startup_timeout_ms),
            ("elixir.prompt_timeout_ms", self.elixir.prompt_timeout_ms),
            ("repl.query_timeout_ms", self.repl.query_timeout_ms),
            ("repl.quiet_period_ms", self.repl.quiet_period_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(HarnessError::config(format!("{name} must be non-zero")));
            }
        }
        if self.epoch.shell.trim().is_empty() || self.elixir.program.trim().is_empty() {
            return Err(HarnessError::config("launcher names must not be empty"));
        }
        Ok(())
    }

    /// Pretty TOML, as written by the config template command.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HarnessError::config(format!("toml encode error: {e}")))
    }
}
