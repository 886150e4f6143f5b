//! Engine settings.
//!
//! Settings live in `<config_dir>/sheetstep/settings.json` and can be
//! overridden per process with `SHEETSTEP_*` environment variables.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Import lines every generated script starts with. The star import brings
/// in the pandas helpers generated code calls, such as
/// `add_formatting_to_excel_sheet`.
pub const DEFAULT_CODE_PRELUDE: [&str; 2] = ["from mitosheet.public.v3 import *", "import pandas as pd"];

/// Tunables for the steps manager, optimizer, and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Run the optimizer over the code chunks after every mutation
    pub optimize_code: bool,
    /// Upper bound on optimizer passes before it gives up and keeps what it has
    pub max_optimizer_passes: usize,
    /// Check optimized code against the un-optimized chunks after every pass
    pub verify_optimization: bool,
    /// Lines placed before the generated statements
    pub code_prelude: Vec<String>,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Where rolling log files go; platform data dir when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            optimize_code: true,
            max_optimizer_passes: 64,
            verify_optimization: cfg!(debug_assertions),
            code_prelude: DEFAULT_CODE_PRELUDE.iter().map(|s| (*s).to_owned()).collect(),
            log_level: "info".to_owned(),
            log_dir: None,
        }
    }
}

impl EngineSettings {
    /// Get the settings file path
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("sheetstep").join("settings.json"))
    }

    /// Load settings from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            Self::from_json(&contents)?
        } else {
            Self::default()
        };

        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Parse settings JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse settings JSON")
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        Ok(())
    }

    /// Apply `SHEETSTEP_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SHEETSTEP_OPTIMIZE_CODE") {
            self.optimize_code = parse_bool(&v).context("SHEETSTEP_OPTIMIZE_CODE")?;
        }
        if let Some(v) = lookup("SHEETSTEP_MAX_OPTIMIZER_PASSES") {
            self.max_optimizer_passes = v
                .trim()
                .parse()
                .context("SHEETSTEP_MAX_OPTIMIZER_PASSES must be a positive integer")?;
        }
        if let Some(v) = lookup("SHEETSTEP_VERIFY_OPTIMIZATION") {
            self.verify_optimization =
                parse_bool(&v).context("SHEETSTEP_VERIFY_OPTIMIZATION")?;
        }
        if let Some(v) = lookup("SHEETSTEP_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("SHEETSTEP_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("expected a boolean, got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings =
            EngineSettings::from_json(r#"{"max_optimizer_passes": 3}"#).expect("parse settings");
        assert_eq!(settings.max_optimizer_passes, 3);
        assert!(settings.optimize_code);
        assert_eq!(
            settings.code_prelude,
            vec!["from mitosheet.public.v3 import *", "import pandas as pd"]
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SHEETSTEP_OPTIMIZE_CODE", "off"),
            ("SHEETSTEP_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut settings = EngineSettings::default();
        settings
            .apply_env_overrides(|k| env.get(k).map(|v| (*v).to_owned()))
            .expect("apply overrides");

        assert!(!settings.optimize_code);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut settings = EngineSettings::default();
        let result = settings.apply_env_overrides(|k| {
            (k == "SHEETSTEP_MAX_OPTIMIZER_PASSES").then(|| "many".to_owned())
        });
        assert!(result.is_err());
    }
}
