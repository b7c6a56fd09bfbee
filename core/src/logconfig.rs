//! Per-component log level configuration.
//!
//! A JSON file maps component name to level name. Levels beyond the five
//! the `log` crate knows (`EMERG`, `ALERT`, `CRIT`, `NOTICE`) are folded
//! onto the nearest one. Keys wrapped in underscores (`_comment_`) are
//! treated as comments and skipped.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LogConfigError {
    #[error("failed to read log config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid log config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A loaded component→level map, queryable by component name.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    levels: HashMap<String, log::LevelFilter>,
}

impl LogConfig {
    pub fn level_for(&self, component: &str) -> Option<log::LevelFilter> {
        self.levels.get(component).copied()
    }

    /// Loads a log-config file from `path`. If the file does not exist, a
    /// default (empty) file is created and an empty config is returned.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, LogConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            fs::write(path, "{}\n")?;
            return Ok(LogConfig::default());
        }
        let raw = fs::read_to_string(path)?;
        let parsed: HashMap<String, String> = serde_json::from_str(&raw)?;

        let mut levels = HashMap::with_capacity(parsed.len());
        for (component, level_name) in parsed {
            if is_comment_key(&component) {
                continue;
            }
            match parse_level(&level_name) {
                Some(level) => {
                    levels.insert(component, level);
                }
                None => {
                    log::warn!("log config: unknown level '{level_name}' for component '{component}', ignoring");
                }
            }
        }
        Ok(LogConfig { levels })
    }
}

fn is_comment_key(key: &str) -> bool {
    key.starts_with('_') && key.ends_with('_')
}

fn parse_level(name: &str) -> Option<log::LevelFilter> {
    use log::LevelFilter::*;
    match name.to_ascii_uppercase().as_str() {
        "EMERG" | "ALERT" | "CRIT" | "ERROR" => Some(Error),
        "WARN" | "NOTICE" => Some(Warn),
        "INFO" => Some(Info),
        "DEBUG" => Some(Debug),
        "TRACE" => Some(Trace),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_file_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logconfig.json");
        let config = LogConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert!(config.level_for("classifier").is_none());
    }

    #[test]
    fn maps_legacy_levels_and_skips_comment_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logconfig.json");
        fs::write(&path, r#"{"_comment_": "ignored", "classifier": "CRIT", "dispatch": "notice"}"#).unwrap();
        let config = LogConfig::load_or_create(&path).unwrap();
        assert_eq!(config.level_for("classifier"), Some(log::LevelFilter::Error));
        assert_eq!(config.level_for("dispatch"), Some(log::LevelFilter::Warn));
        assert!(config.level_for("_comment_").is_none());
    }

    #[test]
    fn unknown_level_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logconfig.json");
        fs::write(&path, r#"{"classifier": "BOGUS"}"#).unwrap();
        let config = LogConfig::load_or_create(&path).unwrap();
        assert!(config.level_for("classifier").is_none());
    }
}
