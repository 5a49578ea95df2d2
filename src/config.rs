//! Configuration management
//!
//! Loads the YAML config naming the MIDI port patterns and device ids for
//! the two hardware families.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub sampler: SamplerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerConfig>,
}

/// Sample box port and addressing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplerConfig {
    pub input_port: String,
    pub output_port: String,
    #[serde(default)]
    pub device_id: u8,
}

/// Pad controller port and addressing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    pub input_port: String,
    pub output_port: String,
    #[serde(default)]
    pub device_id: u8,
    /// Channel for control-change LED feedback and emulated presses
    #[serde(default = "default_led_channel")]
    pub led_channel: u8,
}

fn default_led_channel() -> u8 {
    0
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.sampler.input_port.is_empty() {
            anyhow::bail!("Sampler input_port cannot be empty");
        }
        if self.sampler.output_port.is_empty() {
            anyhow::bail!("Sampler output_port cannot be empty");
        }

        if let Some(controller) = &self.controller {
            if controller.input_port.is_empty() || controller.output_port.is_empty() {
                anyhow::bail!("Controller ports cannot be empty");
            }
            if controller.led_channel > 15 {
                anyhow::bail!(
                    "Controller led_channel must be 0-15, got {}",
                    controller.led_channel
                );
            }
        }

        Ok(())
    }
}
