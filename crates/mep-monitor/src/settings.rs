//! Monitor settings file (TOML)

use anyhow::{Context, Result};
use mep_acquisition::SessionConfig;
use mep_core::{config_error, MepResult};
use mep_processing::{AnalysisConfig, EpochConfig};
use mep_simulation::AmplifierConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Polling behaviour of the monitor loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    /// Interval between buffer drains
    pub poll_interval_ms: u64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl MonitorOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> MepResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(config_error!("poll_interval_ms must be greater than 0"));
        }
        Ok(())
    }
}

/// Everything the monitor binary can be configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub session: SessionConfig,
    pub epoch: EpochConfig,
    pub analysis: AnalysisConfig,
    pub monitor: MonitorOptions,
    /// Used only with `--simulate`
    pub simulator: AmplifierConfig,
}

impl MonitorSettings {
    /// Read settings from a TOML file; missing keys take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse settings file {:?}", path))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file {:?}", path))
    }

    pub fn validate(&self) -> MepResult<()> {
        self.session.validate()?;
        self.epoch.validate()?;
        self.analysis.validate()?;
        self.monitor.validate()?;
        self.simulator.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_valid() {
        let settings = MonitorSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.monitor.poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.session.local_addr.port(), 50000);
        assert_eq!(settings.session.device_addr.to_string(), "192.168.200.220:5050");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");

        let mut settings = MonitorSettings::default();
        settings.epoch.history_cap = 8;
        settings.analysis.channel = 1;
        settings.simulator.seed = Some(7);
        settings.save(&path).unwrap();

        let loaded = MonitorSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[session]
device_addr = "10.0.0.5:5050"

[epoch]
t_min_ms = -20.0
t_max_ms = 80.0

[monitor]
poll_interval_ms = 250
"#
        )
        .unwrap();

        let settings = MonitorSettings::load(file.path()).unwrap();
        assert_eq!(settings.session.device_addr.to_string(), "10.0.0.5:5050");
        assert_eq!(settings.session.recv_timeout_ms, 1000);
        assert_eq!(settings.epoch.t_min_ms, -20.0);
        assert_eq!(settings.epoch.history_cap, 5);
        assert_eq!(settings.monitor.poll_interval_ms, 250);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = MonitorSettings::default();
        settings.monitor.poll_interval_ms = 0;
        assert!(settings.validate().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[epoch]\nhistory_cap = \"many\"\n").unwrap();
        assert!(MonitorSettings::load(file.path()).is_err());
        assert!(MonitorSettings::load("/nonexistent/monitor.toml").is_err());
    }
}
