use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use syslog_exporter::config::{self, Config};
use tracing::info;

/// Execute the config show command
///
/// Displays the current configuration with secrets masked
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config(config_path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    Ok(())
}

/// Mask device API keys for safe display
fn sanitize_secrets(cfg: &Config) -> Config {
    let mut sanitized = cfg.clone();

    for device in &mut sanitized.devices {
        if let Some(key) = &device.api_key {
            device.api_key = Some(mask_api_key(key));
        }
    }

    sanitized
}

/// Shows the first 3 and last 2 characters
/// Example: "abcdef123456" -> "abc...56"
fn mask_api_key(key: &str) -> String {
    if key.chars().count() <= 8 {
        return "***".to_string();
    }

    let prefix: String = key.chars().take(3).collect();
    let suffix: String = key.chars().rev().take(2).collect::<Vec<_>>().into_iter().rev().collect();

    format!("{}...{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syslog_exporter::config::{
        DeviceConfig, ExpositionConfig, ForwardConfig, ProbeConfig, ServerConfig, SyslogConfig,
    };

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("abcdef123456"), "abc...56");
        assert_eq!(mask_api_key("short"), "***");
    }

    #[test]
    fn test_sanitize_secrets() {
        let cfg = Config {
            server: ServerConfig::default(),
            syslog: SyslogConfig::default(),
            exposition: ExpositionConfig::default(),
            probe: ProbeConfig::default(),
            forward: ForwardConfig::default(),
            devices: vec![
                DeviceConfig {
                    address: "192.168.1.20".to_string(),
                    name: None,
                    model: None,
                    api_key: Some("Xk29dLqP0wRt".to_string()),
                },
                DeviceConfig {
                    address: "192.168.1.21".to_string(),
                    name: None,
                    model: None,
                    api_key: None,
                },
            ],
        };

        let sanitized = sanitize_secrets(&cfg);
        assert_eq!(sanitized.devices[0].api_key.as_deref(), Some("Xk2...Rt"));
        assert!(sanitized.devices[1].api_key.is_none());
        // Serializes cleanly for display
        assert!(toml::to_string_pretty(&sanitized).is_ok());
    }
}
