//! Config and dictionary files

use std::path::Path;

use anyhow::{Context, Result};
use cid_protocol::EventDictionary;
use cid_relay::{Endpoint, RetranslatorConfig};
use tracing::{info, warn};

/// Load the engine config, falling back to defaults if the file is missing
pub fn load_config(path: &Path) -> Result<RetranslatorConfig> {
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(RetranslatorConfig::default());
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load the event dictionary; a missing file leaves every event unenriched
pub fn load_dictionary(path: &Path) -> Result<EventDictionary> {
    if !path.exists() {
        warn!(
            "Event dictionary {} not found, events will not be enriched",
            path.display()
        );
        return Ok(EventDictionary::new());
    }

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read event dictionary {}", path.display()))?;
    let dictionary = EventDictionary::from_json(&data)
        .with_context(|| format!("Failed to parse event dictionary {}", path.display()))?;
    info!("Loaded {} event codes from {}", dictionary.len(), path.display());
    Ok(dictionary)
}

/// Apply command-line endpoint overrides
pub fn apply_overrides(
    config: &mut RetranslatorConfig,
    listen: Option<&str>,
    upstream: Option<&str>,
) -> Result<()> {
    if let Some(listen) = listen {
        config.listen = listen.parse::<Endpoint>().context("Invalid --listen")?;
    }
    if let Some(upstream) = upstream {
        config.upstream = upstream.parse::<Endpoint>().context("Invalid --upstream")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "cid-retranslator-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let missing = Path::new("/nonexistent/cid-retranslator/config.json");
        assert_eq!(load_config(missing).unwrap(), RetranslatorConfig::default());
        assert!(load_dictionary(missing).unwrap().is_empty());
    }

    #[test]
    fn test_partial_config() {
        let path = scratch_file(
            "config.json",
            r#"{
                "upstream": { "host": "10.1.1.1", "port": 9000 },
                "queue_capacity": 50,
                "dialect": { "kind": "header_rewrite", "header": "1011000" },
                "timeouts": { "ack_ms": 2000 }
            }"#,
        );
        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.upstream, Endpoint::new("10.1.1.1", 9000));
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.timeouts.ack_ms, Some(2000));
        assert_eq!(config.timeouts.write_ms, 5_000);
        assert_eq!(config.listen, RetranslatorConfig::default().listen);
    }

    #[test]
    fn test_bad_config_is_an_error() {
        let path = scratch_file("bad.json", "{ not json");
        let result = load_config(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_dictionary_file() {
        let path = scratch_file(
            "events.json",
            r#"[{ "code": "E130", "type": "Burglary", "description": "Zone alarm" }]"#,
        );
        let dictionary = load_dictionary(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(dictionary.lookup("E130").unwrap().event_type, "Burglary");
    }

    #[test]
    fn test_overrides() {
        let mut config = RetranslatorConfig::default();
        apply_overrides(&mut config, Some("127.0.0.1:7000"), None).unwrap();
        assert_eq!(config.listen, Endpoint::new("127.0.0.1", 7000));
        assert!(apply_overrides(&mut config, None, Some("nope")).is_err());
    }
}
