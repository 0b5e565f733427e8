//! `config`: write the default client configuration to disk.

use anyhow::{Context, Result};
use clap::ValueEnum;
use shared::config::ClientConfig;
use std::{fs, path::PathBuf};

/// On-disk format of a generated configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    /// `config.yaml`
    Yaml,
    /// `config.json`
    Json,
}

impl ConfigFormat {
    const fn default_file_name(self) -> &'static str {
        match self {
            Self::Yaml => "config.yaml",
            Self::Json => "config.json",
        }
    }
}

/// Serializes the default client configuration.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn render_default_config(format: ConfigFormat) -> Result<String> {
    let config = ClientConfig::with_defaults();
    let serialized = match format {
        ConfigFormat::Yaml => serde_yml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };
    Ok(serialized)
}

/// Generates a configuration file in the specified format.
///
/// # Arguments
/// * `format` - The format of the configuration file.
/// * `output` - Target path; defaults to `config.yaml`/`config.json` in the
///   current directory.
///
/// # Errors
/// Returns an error if serialization or writing the file fails.
pub fn generate_config(format: ConfigFormat, output: Option<PathBuf>) -> Result<PathBuf> {
    let path = output.unwrap_or_else(|| PathBuf::from(format.default_file_name()));
    let serialized = render_default_config(format)?;

    fs::write(&path, serialized)
        .with_context(|| format!("failed to write configuration to {}", path.display()))?;

    println!(
        "Configuration file '{}' generated successfully.",
        path.display()
    );
    Ok(path)
}
