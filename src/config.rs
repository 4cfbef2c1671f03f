//! Configuration file support for classforge
//!
//! This module loads engine settings from `.classforge.toml` files, so a project can
//! pin its backup directory and the external formatter/checker commands.
//!
//! # Example Configuration
//!
//! ```toml
//! [engine]
//! backup_dir = ".classforge_backups"
//! package_suffix = "_pkg"
//! import_check = true
//!
//! [tools.formatter]
//! enabled = true
//! command = ["black", "--quiet"]
//! timeout_secs = 30
//!
//! [tools.syntax_checker]
//! enabled = true
//! required = false
//! command = ["python3", "-m", "py_compile"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the settings file searched for by [`Config::find_and_load`]
pub const CONFIG_FILE_NAME: &str = ".classforge.toml";

/// Main configuration structure loaded from `.classforge.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Engine behaviour
    pub engine: EngineSettings,

    /// External collaborators
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the `.classforge.toml` file
    ///
    /// # Returns
    ///
    /// A `Config` instance loaded from the file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config: Config =
            toml::from_str(&contents).context("Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Try to load configuration from the current directory or its parents
    ///
    /// # Returns
    ///
    /// The first `.classforge.toml` found walking upwards, otherwise the defaults
    pub fn load_from_current_dir() -> Self {
        Self::find_and_load(".").unwrap_or_default()
    }

    /// Find and load configuration file starting from a given directory
    ///
    /// # Arguments
    ///
    /// * `start_dir` - Directory to start searching from
    ///
    /// # Returns
    ///
    /// A `Config` instance if found, otherwise `None`
    pub fn find_and_load<P: AsRef<Path>>(start_dir: P) -> Option<Self> {
        let mut current_dir = fs::canonicalize(start_dir.as_ref())
            .unwrap_or_else(|_| start_dir.as_ref().to_path_buf());

        loop {
            let config_path = current_dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::from_file(&config_path).ok();
            }

            if !current_dir.pop() {
                break;
            }
        }

        None
    }

    /// Save configuration to a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path where to save the configuration
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        fs::write(path.as_ref(), toml_string).context("Failed to write configuration file")?;
        Ok(())
    }

    /// Merge command-line arguments with configuration file settings
    ///
    /// Command-line arguments take precedence over configuration file settings.
    pub fn merge_with_args(
        &mut self,
        format: Option<bool>,
        import_check: Option<bool>,
        backup_dir: Option<String>,
    ) {
        if let Some(format) = format {
            self.tools.formatter.enabled = format;
        }
        if let Some(import_check) = import_check {
            self.engine.import_check = import_check;
        }
        if let Some(backup_dir) = backup_dir {
            self.engine.backup_dir = backup_dir;
        }
    }

    /// Settings with every external tool switched off
    ///
    /// Only the built-in re-parse guards the output, so no Python toolchain is needed.
    pub fn offline() -> Self {
        let mut config = Config::default();
        config.engine.import_check = false;
        config.tools.formatter.enabled = false;
        config.tools.syntax_checker.enabled = false;
        config.tools.import_checker.enabled = false;
        config
    }
}

/// Core engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Hidden directory, next to the target file, that receives backups
    pub backup_dir: String,

    /// Suffix of the package directory created by a file split (`<stem><suffix>`)
    pub package_suffix: String,

    /// Whether to run the advisory import check after committing
    pub import_check: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backup_dir: ".classforge_backups".to_string(),
            package_suffix: "_pkg".to_string(),
            import_check: true,
        }
    }
}

/// Settings for the three external tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub formatter: ToolSettings,
    pub syntax_checker: ToolSettings,
    pub import_checker: ToolSettings,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            formatter: ToolSettings::with_command(&["black", "--quiet"]),
            syntax_checker: ToolSettings::with_command(&["python3", "-m", "py_compile"]),
            import_checker: ToolSettings::with_command(&["python3", "-c"]),
        }
    }
}

/// One external command
///
/// An empty `command` falls back to the tool's built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub enabled: bool,

    /// Treat unavailability or timeout as fatal (only meaningful for the syntax checker)
    pub required: bool,

    /// Program and leading arguments; the target path is appended
    pub command: Vec<String>,

    pub timeout_secs: u64,
}

impl ToolSettings {
    fn with_command(command: &[&str]) -> Self {
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Configured command, or `fallback` when none is set
    pub fn command_line(&self, fallback: &[&str]) -> Vec<String> {
        if self.command.is_empty() {
            fallback.iter().map(|s| s.to_string()).collect()
        } else {
            self.command.clone()
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            command: Vec::new(),
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.backup_dir, ".classforge_backups");
        assert_eq!(config.engine.package_suffix, "_pkg");
        assert!(config.engine.import_check);
        assert_eq!(config.tools.formatter.command, vec!["black", "--quiet"]);
        assert!(!config.tools.syntax_checker.required);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();
        assert!(toml_string.contains("backup_dir"));
        assert!(toml_string.contains("py_compile"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [engine]
            backup_dir = ".bak"
            import_check = false

            [tools.formatter]
            enabled = false

            [tools.syntax_checker]
            required = true
            command = ["python3.12", "-m", "py_compile"]
            timeout_secs = 5
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.backup_dir, ".bak");
        assert_eq!(config.engine.package_suffix, "_pkg");
        assert!(!config.engine.import_check);
        assert!(!config.tools.formatter.enabled);
        assert_eq!(
            config.tools.formatter.command_line(&["black"]),
            vec!["black".to_string()]
        );
        assert!(config.tools.syntax_checker.required);
        assert_eq!(config.tools.syntax_checker.timeout_secs, 5);
        assert_eq!(config.tools.syntax_checker.command[0], "python3.12");
        assert!(config.tools.import_checker.enabled);
    }

    #[test]
    fn test_config_merge_with_args() {
        let mut config = Config::default();
        config.merge_with_args(Some(false), Some(false), Some(".snapshots".to_string()));

        assert!(!config.tools.formatter.enabled);
        assert!(!config.engine.import_check);
        assert_eq!(config.engine.backup_dir, ".snapshots");

        config.merge_with_args(None, None, None);
        assert!(!config.tools.formatter.enabled);
    }

    #[test]
    fn test_offline_disables_every_tool() {
        let config = Config::offline();
        assert!(!config.tools.formatter.enabled);
        assert!(!config.tools.syntax_checker.enabled);
        assert!(!config.tools.import_checker.enabled);
        assert!(!config.engine.import_check);
    }

    #[test]
    fn test_config_save_and_find() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("src").join("app");
        fs::create_dir_all(&nested).unwrap();

        let mut config = Config::default();
        config.engine.backup_dir = ".found".to_string();
        config
            .save_to_file(temp_dir.path().join(CONFIG_FILE_NAME))
            .unwrap();

        let loaded = Config::find_and_load(&nested).unwrap();
        assert_eq!(loaded.engine.backup_dir, ".found");
    }
}
