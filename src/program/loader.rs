//! Filesystem loading for program definitions

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::Program;

/// Serialization formats accepted for program definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
    Toml,
}

impl DefinitionFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// Parse any serde definition (program, scenario) in the given format
pub fn parse_definition<T: DeserializeOwned>(contents: &str, format: DefinitionFormat) -> Result<T> {
    let value = match format {
        DefinitionFormat::Json => serde_json::from_str(contents).context("Failed to parse JSON")?,
        DefinitionFormat::Yaml => serde_yaml::from_str(contents).context("Failed to parse YAML")?,
        DefinitionFormat::Toml => toml::from_str(contents).context("Failed to parse TOML")?,
    };
    Ok(value)
}

/// Parse a program definition from a string
pub fn parse_program(contents: &str, format: DefinitionFormat) -> Result<Program> {
    parse_definition(contents, format).context("Invalid program definition")
}

/// Load a program definition, choosing the parser by file extension
pub fn load_program(path: &Path) -> Result<Program> {
    let Some(format) = DefinitionFormat::from_path(path) else {
        bail!(
            "Unsupported program file extension: {} (expected .json, .yaml, .yml or .toml)",
            path.display()
        );
    };

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read program file: {}", path.display()))?;
    let program = parse_program(&contents, format)
        .with_context(|| format!("Invalid program definition: {}", path.display()))?;

    debug!(
        program = %program.name,
        modules = program.modules.len(),
        "Loaded program from {}",
        path.display()
    );
    Ok(program)
}

/// Write a program definition as JSON
pub fn save_program(program: &Program, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    let json = program
        .to_json()
        .context("Failed to serialize program to JSON")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write program file: {}", path.display()))?;
    Ok(())
}
