//! Settings loading from configuration files.
//!
//! This module loads [`EngineSettings`] from TOML or JSON documents and
//! applies environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `STENCIL_BLOCK_START` / `STENCIL_BLOCK_END` | `block_start` / `block_end` |
//! | `STENCIL_VARIABLE_START` / `STENCIL_VARIABLE_END` | `variable_start` / `variable_end` |
//! | `STENCIL_TRIM_BLOCKS` | `trim_blocks` |
//! | `STENCIL_LSTRIP_BLOCKS` | `lstrip_blocks` |
//! | `STENCIL_AUTOESCAPE` | `autoescape` |
//! | `STENCIL_NO_CACHE` | `no_cache` |
//! | `STENCIL_BASE_DIR` | `base_dir` |
//! | `STENCIL_EXT` | `ext` |
//! | `STENCIL_MAX_DEPTH` | `max_depth` |
//! | `STENCIL_DEBUG` | `debug` |
//! | `STENCIL_LOG_LEVEL` | `log_level` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use stencil_core::settings_loader;
//!
//! let settings = settings_loader::from_file("config/stencil.toml").unwrap();
//! let settings = settings_loader::from_toml_file_with_env("config/stencil.toml").unwrap();
//! ```

use std::path::{Path, PathBuf};

use crate::error::StencilError;
use crate::settings::EngineSettings;

/// Loads settings from a TOML string.
///
/// Fields not present in the TOML keep their default values. The result is
/// validated before it is returned.
pub fn from_toml_str(toml_str: &str) -> Result<EngineSettings, StencilError> {
    let settings: EngineSettings = toml::from_str(toml_str)
        .map_err(|e| StencilError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a JSON string.
pub fn from_json_str(json_str: &str) -> Result<EngineSettings, StencilError> {
    let settings: EngineSettings = serde_json::from_str(json_str)
        .map_err(|e| StencilError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<EngineSettings, StencilError> {
    from_toml_str(&read_config(path.as_ref(), "TOML")?)
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<EngineSettings, StencilError> {
    from_json_str(&read_config(path.as_ref(), "JSON")?)
}

/// Loads settings from a file, choosing the format from its extension
/// (`.json` is JSON, anything else is TOML).
pub fn from_file(path: impl AsRef<Path>) -> Result<EngineSettings, StencilError> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => from_json_file(path),
        _ => from_toml_file(path),
    }
}

/// Loads settings from a TOML file and then applies environment variable overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<EngineSettings, StencilError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> Result<EngineSettings, StencilError> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> EngineSettings {
    let mut settings = EngineSettings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `STENCIL_*` environment variable overrides to a settings struct.
///
/// Boolean variables accept `true`/`1`/`yes` (case-insensitive) as true and
/// anything else as false. An unparsable `STENCIL_MAX_DEPTH` is ignored.
pub fn apply_env_overrides(settings: &mut EngineSettings) {
    let strings = [
        ("STENCIL_BLOCK_START", &mut settings.block_start),
        ("STENCIL_BLOCK_END", &mut settings.block_end),
        ("STENCIL_VARIABLE_START", &mut settings.variable_start),
        ("STENCIL_VARIABLE_END", &mut settings.variable_end),
        ("STENCIL_EXT", &mut settings.ext),
        ("STENCIL_LOG_LEVEL", &mut settings.log_level),
    ];
    for (var, field) in strings {
        if let Ok(val) = std::env::var(var) {
            *field = val;
        }
    }

    let flags = [
        ("STENCIL_TRIM_BLOCKS", &mut settings.trim_blocks),
        ("STENCIL_LSTRIP_BLOCKS", &mut settings.lstrip_blocks),
        ("STENCIL_AUTOESCAPE", &mut settings.autoescape),
        ("STENCIL_NO_CACHE", &mut settings.no_cache),
        ("STENCIL_DEBUG", &mut settings.debug),
    ];
    for (var, field) in flags {
        if let Ok(val) = std::env::var(var) {
            *field = parse_flag(&val);
        }
    }

    if let Ok(val) = std::env::var("STENCIL_BASE_DIR") {
        settings.base_dir = PathBuf::from(val);
    }

    if let Ok(val) = std::env::var("STENCIL_MAX_DEPTH") {
        if let Ok(depth) = val.parse::<usize>() {
            settings.max_depth = depth;
        }
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn read_config(path: &Path, format: &str) -> Result<String, StencilError> {
    std::fs::read_to_string(path).map_err(|e| {
        StencilError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            block_start = "<%"
            block_end = "%>"
            variable_start = "<%="
            variable_end = "%>"
            trim_blocks = true
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.block_start, "<%");
        assert_eq!(settings.variable_start, "<%=");
        assert!(settings.trim_blocks);
        // Defaults preserved
        assert!(settings.autoescape);
        assert_eq!(settings.ext, "tpl");
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_from_toml_str_invalid() {
        assert!(from_toml_str("this is not = = toml").is_err());
    }

    #[test]
    fn test_from_toml_str_rejects_same_delimiters() {
        let toml = r#"
            block_start = "<%"
            variable_start = "<%"
        "#;
        let err = from_toml_str(toml).unwrap_err();
        assert!(matches!(err, StencilError::ConfigurationError(_)));
    }

    #[test]
    fn test_from_toml_str_base_dir() {
        let settings = from_toml_str(r#"base_dir = "templates""#).unwrap();
        assert_eq!(settings.base_dir, PathBuf::from("templates"));
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let settings = from_json_str(r#"{"autoescape": false, "no_cache": true}"#).unwrap();
        assert!(!settings.autoescape);
        assert!(settings.no_cache);
        assert_eq!(settings.block_end, "%}");
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{not json").is_err());
    }

    #[test]
    fn test_from_json_str_wrong_type() {
        assert!(from_json_str(r#"{"trim_blocks": "sometimes"}"#).is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_file_by_extension() {
        let dir = std::env::temp_dir().join("stencil_test_settings_files");
        std::fs::create_dir_all(&dir).unwrap();

        let toml_path = dir.join("stencil.toml");
        std::fs::write(&toml_path, "ext = \"html\"\n").unwrap();
        let json_path = dir.join("stencil.json");
        std::fs::write(&json_path, r#"{"ext": "txt"}"#).unwrap();

        assert_eq!(from_file(&toml_path).unwrap().ext, "html");
        assert_eq!(from_file(&json_path).unwrap().ext, "txt");

        std::fs::remove_file(&toml_path).ok();
        std::fs::remove_file(&json_path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/stencil.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = from_json_file("/nonexistent/path/stencil.json");
        assert!(result.is_err());
    }

    // ── Environment variable overrides ──────────────────────────────

    #[test]
    fn test_apply_env_overrides_strings_and_flags() {
        let mut settings = EngineSettings::default();
        std::env::set_var("STENCIL_EXT", "jinja");
        std::env::set_var("STENCIL_LSTRIP_BLOCKS", "YES");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.ext, "jinja");
        assert!(settings.lstrip_blocks);
        std::env::remove_var("STENCIL_EXT");
        std::env::remove_var("STENCIL_LSTRIP_BLOCKS");
    }

    #[test]
    fn test_apply_env_overrides_max_depth() {
        let mut settings = EngineSettings::default();
        std::env::set_var("STENCIL_MAX_DEPTH", "12");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.max_depth, 12);

        std::env::set_var("STENCIL_MAX_DEPTH", "lots");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.max_depth, 12);
        std::env::remove_var("STENCIL_MAX_DEPTH");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag("Yes"));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }
}
