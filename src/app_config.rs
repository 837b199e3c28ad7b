//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use shared_fetch_core::operation::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use shared_fetch_core::{DownloadOptions, RejectionPolicy};

use crate::cli::Args;

/// File configuration for download defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    pub allow_background_execution: Option<bool>,
    pub auto_cancel_when_unobserved: Option<bool>,
    pub should_decompress_result: Option<bool>,
    pub ignore_cached_response: Option<bool>,
    pub retrieve_existing_data_when_not_modified: Option<bool>,
    /// Status codes rejected as soon as headers arrive.
    pub reject_statuses: Option<RejectionPolicy>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// HTTP timeouts after merging config with built-in defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect_secs: u64,
    pub read_secs: u64,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/shared-fetch/config.toml`
/// 2. `$HOME/.config/shared-fetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("shared-fetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("shared-fetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "allow_background_execution" => {
                cfg.allow_background_execution = Some(parse_boolean(value).with_context(invalid)?);
            }
            "auto_cancel_when_unobserved" => {
                cfg.auto_cancel_when_unobserved =
                    Some(parse_boolean(value).with_context(invalid)?);
            }
            "should_decompress_result" => {
                cfg.should_decompress_result = Some(parse_boolean(value).with_context(invalid)?);
            }
            "ignore_cached_response" => {
                cfg.ignore_cached_response = Some(parse_boolean(value).with_context(invalid)?);
            }
            "retrieve_existing_data_when_not_modified" => {
                cfg.retrieve_existing_data_when_not_modified =
                    Some(parse_boolean(value).with_context(invalid)?);
            }
            "reject_statuses" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                let policy = parsed
                    .parse::<RejectionPolicy>()
                    .with_context(|| {
                        format!("Invalid `reject_statuses` value '{parsed}' on line {line_no}")
                    })?;
                cfg.reject_statuses = Some(policy);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

/// Builds operation options: CLI flags win, then the config file, then defaults.
#[must_use]
pub fn resolve_options(args: &Args, config: Option<&FileConfig>) -> DownloadOptions {
    let file = config.cloned().unwrap_or_default();
    let rejection = args
        .reject_status
        .clone()
        .or(file.reject_statuses)
        .unwrap_or_default();
    DownloadOptions::new()
        .allow_background_execution(file.allow_background_execution.unwrap_or(false))
        .auto_cancel_when_unobserved(
            args.auto_cancel || file.auto_cancel_when_unobserved.unwrap_or(false),
        )
        .should_decompress_result(args.decompress || file.should_decompress_result.unwrap_or(false))
        .ignore_cached_response(args.ignore_cached || file.ignore_cached_response.unwrap_or(false))
        .retrieve_existing_data_when_not_modified(
            args.not_modified_aware
                || file
                    .retrieve_existing_data_when_not_modified
                    .unwrap_or(false),
        )
        .with_rejection(rejection)
}

/// Resolves HTTP timeouts from config, falling back to built-in defaults.
#[must_use]
pub fn resolve_http_timeouts(config: Option<&FileConfig>) -> HttpTimeouts {
    HttpTimeouts {
        connect_secs: config
            .and_then(|c| c.connect_timeout_secs)
            .unwrap_or(CONNECT_TIMEOUT_SECS),
        read_secs: config
            .and_then(|c| c.read_timeout_secs)
            .unwrap_or(READ_TIMEOUT_SECS),
    }
}
