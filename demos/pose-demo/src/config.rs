//! Demo configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `./demo.toml`.

use serde::Deserialize;
use std::path::Path;

/// Top-level demo configuration: one provider and one consumer sharing a
/// single in-process loopback link.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub provider: ComponentSpec,
    pub consumer: ComponentSpec,
    pub rate_hz: f64,
    pub run_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub subsystem: u8,
    pub node: u8,
    pub component: u8,
    pub instance: u8,
    pub authority: u8,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    provider: Option<RawComponentSpec>,
    consumer: Option<RawComponentSpec>,
    rate_hz: Option<f64>,
    run_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawComponentSpec {
    subsystem: Option<u8>,
    node: Option<u8>,
    component: Option<u8>,
    instance: Option<u8>,
    authority: Option<u8>,
}

pub fn load_config_from_path(path: &Path) -> Result<DemoConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<DemoConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let provider = raw
        .provider
        .ok_or_else(|| ConfigError::MissingField("provider".to_owned()))
        .and_then(|p| component_spec(p, 1))?;
    let consumer = raw
        .consumer
        .ok_or_else(|| ConfigError::MissingField("consumer".to_owned()))
        .and_then(|c| component_spec(c, 2))?;

    Ok(DemoConfig {
        provider,
        consumer,
        rate_hz: raw.rate_hz.unwrap_or(10.0),
        run_seconds: raw.run_seconds.unwrap_or(3),
    })
}

fn component_spec(raw: RawComponentSpec, default_component: u8) -> Result<ComponentSpec, ConfigError> {
    Ok(ComponentSpec {
        subsystem: raw.subsystem.unwrap_or(1),
        node: raw.node.unwrap_or(1),
        component: raw.component.unwrap_or(default_component),
        instance: raw.instance.unwrap_or(1),
        authority: raw.authority.unwrap_or(6),
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
