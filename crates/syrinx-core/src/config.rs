//! Runtime configuration.
//!
//! Every identifier and delay the loader uses is configurable: the target
//! process/module, the payload file name, the pipe name, and the two
//! injection delays. Missing fields fall back to the defaults, so a partial
//! config file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::inject::InjectDelays;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Executable name of the process to inject into (exact, case-sensitive).
    pub target_process: String,
    /// Module that must be mapped in the target before injection proceeds.
    pub target_module: String,
    /// Payload file name, resolved next to our own executable at inject time.
    pub payload_file: String,
    /// Local pipe name of the control channel (without the `\\.\pipe\` prefix).
    pub pipe_name: String,
    /// Delay between opening the target and touching its address space.
    /// A heuristic stand-in for "the target finished initializing", not a
    /// synchronization guarantee.
    pub startup_delay_ms: u64,
    /// Delay between firing the remote thread and freeing the path buffer,
    /// giving the remote loader time to read its argument. Same caveat.
    pub handoff_delay_ms: u64,
    /// How often blocked channel waits re-check for progress or shutdown.
    pub poll_interval_ms: u64,
    /// Control-loop tick; the keybind registry is polled once per tick.
    pub tick_interval_ms: u64,
    /// Pause between discovery attempts while waiting for the target.
    pub retry_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_process: "RainbowSix.exe".to_string(),
            target_module: "RainbowSix.exe".to_string(),
            payload_file: "syrinx.dll".to_string(),
            pipe_name: "SyrinxRpc".to_string(),
            startup_delay_ms: 10_000,
            handoff_delay_ms: 10,
            poll_interval_ms: 100,
            tick_interval_ms: 50,
            retry_interval_secs: 5,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let content = fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn inject_delays(&self) -> InjectDelays {
        InjectDelays {
            startup: Duration::from_millis(self.startup_delay_ms),
            handoff: Duration::from_millis(self.handoff_delay_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_loader() {
        let config = Config::default();
        assert_eq!(config.target_process, "RainbowSix.exe");
        assert_eq!(config.payload_file, "syrinx.dll");
        assert_eq!(config.pipe_name, "SyrinxRpc");
        assert_eq!(config.startup_delay_ms, 10_000);
        assert_eq!(config.handoff_delay_ms, 10);
    }

    #[test]
    fn load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.target_process = "Other.exe".to_string();
        config.retry_interval_secs = 1;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "target_process": "Notepad.exe" }"#).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.target_process, "Notepad.exe");
        assert_eq!(loaded.pipe_name, Config::default().pipe_name);
        assert_eq!(loaded.startup_delay_ms, Config::default().startup_delay_ms);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("nope.json"));
        assert!(result.is_err());
        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn delay_accessors_convert_units() {
        let config = Config::default();
        assert_eq!(config.inject_delays().startup, Duration::from_secs(10));
        assert_eq!(config.inject_delays().handoff, Duration::from_millis(10));
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
    }
}
