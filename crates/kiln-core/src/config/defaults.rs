//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "kiln.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "kiln.yaml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".kiln.toml";

/// Directory holding per-build state (checksums)
pub const STATE_DIR: &str = ".kiln";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ALT_CONFIG_FILE,
        ".kiln.yaml",
    ]
}
