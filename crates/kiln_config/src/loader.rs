//! Configuration file loading and validation.

use std::path::Path;

use kiln_ledger::generation::{MAX_SHARD_BITS, SIGNATURE_LEN};

use crate::error::ConfigError;
use crate::types::ProjectConfig;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Loads `<project_dir>/kiln.toml`, or the defaults if there is none.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return Ok(ProjectConfig::default());
    }
    load_config_file(&config_path)
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<ProjectConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    let ledger = &config.ledger;
    if ledger.name.is_empty() || ledger.name.contains(['/', '\\']) {
        return Err(ConfigError::ValidationError {
            field: "ledger.name",
            reason: format!("'{}' is not a plain file name", ledger.name),
        });
    }
    if ledger.signature.is_empty() || ledger.signature.len() > SIGNATURE_LEN {
        return Err(ConfigError::ValidationError {
            field: "ledger.signature",
            reason: format!("must be 1 to {SIGNATURE_LEN} bytes"),
        });
    }
    if !(1..=MAX_SHARD_BITS).contains(&ledger.shard_bits) {
        return Err(ConfigError::ValidationError {
            field: "ledger.shard_bits",
            reason: format!("must be between 1 and {MAX_SHARD_BITS}"),
        });
    }
    if ledger.shard_capacity == 0 {
        return Err(ConfigError::ValidationError {
            field: "ledger.shard_capacity",
            reason: "must be positive".to_string(),
        });
    }
    if config.build.jobs == Some(0) {
        return Err(ConfigError::ValidationError {
            field: "build.jobs",
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeDetectionSetting;
    use std::path::PathBuf;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = load_config_from_str("").unwrap();
        assert!(config.project.name.is_empty());
        assert_eq!(config.ledger.shard_bits, 10);
        assert_eq!(config.build.jobs, None);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[project]
name = "firmware"

[ledger]
dir = "out/.kiln"
name = "esp32"
signature = "fw-ledger-3"
shard_bits = 8
shard_capacity = 64
change_detection = "content"

[build]
jobs = 4
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.project.name, "firmware");
        assert_eq!(config.ledger.dir, PathBuf::from("out/.kiln"));
        assert_eq!(config.ledger.name, "esp32");
        assert_eq!(config.ledger.signature, "fw-ledger-3");
        assert_eq!(config.ledger.shard_bits, 8);
        assert_eq!(config.ledger.shard_capacity, 64);
        assert_eq!(config.ledger.change_detection, ChangeDetectionSetting::Content);
        assert_eq!(config.build.jobs, Some(4));
    }

    #[test]
    fn shard_bits_out_of_range() {
        let err = load_config_from_str("[ledger]\nshard_bits = 17\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError { field: "ledger.shard_bits", .. }
        ));
        assert!(load_config_from_str("[ledger]\nshard_bits = 0\n").is_err());
    }

    #[test]
    fn zero_capacity_and_jobs_rejected() {
        assert!(load_config_from_str("[ledger]\nshard_capacity = 0\n").is_err());
        assert!(load_config_from_str("[build]\njobs = 0\n").is_err());
    }

    #[test]
    fn long_signature_rejected() {
        let toml = format!("[ledger]\nsignature = \"{}\"\n", "x".repeat(33));
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("ledger.signature"));
    }

    #[test]
    fn ledger_name_must_be_plain() {
        assert!(load_config_from_str("[ledger]\nname = \"a/b\"\n").is_err());
        assert!(load_config_from_str("[ledger]\nname = \"\"\n").is_err());
    }

    #[test]
    fn unknown_change_detection_rejected() {
        let err = load_config_from_str("[ledger]\nchange_detection = \"inode\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn unknown_ledger_key_rejected() {
        let err = load_config_from_str("[ledger]\nshard_count = 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.ledger.name, "ledger");
    }

    #[test]
    fn load_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[build]\njobs = 2\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.build.jobs, Some(2));
    }

    #[test]
    fn explicit_missing_file_errors() {
        let err = load_config_file(Path::new("/nonexistent/kiln.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
