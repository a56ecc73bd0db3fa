//! Application settings and file filtering.
//!
//! Settings are read from a TOML file and control where the category rules
//! and the action log live, how long watch mode waits for a burst of
//! filesystem events to settle, and which files an organize pass must leave
//! alone.
//!
//! # Settings File Format
//!
//! ```toml
//! [paths]
//! categories_file = "categories.json"
//! log_file = "fileforge_log.txt"
//!
//! [watch]
//! settle_ms = 500
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["Thumbs.db"]
//! patterns = ["draft?.txt"]
//! extensions = ["tmp", "part", "crdownload"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```
//!
//! Every section and key is optional; missing values take their defaults.
//! The default filters skip nothing, so every file in the folder is
//! organized until a settings file says otherwise.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-directory settings file.
pub const LOCAL_SETTINGS_FILE: &str = ".fileforgerc.toml";

/// Errors raised while loading settings or category rules.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested settings file does not exist.
    #[error("settings file not found: {}", .0.display())]
    SettingsNotFound(PathBuf),

    /// The settings file is not valid TOML or has the wrong shape.
    #[error("invalid settings in {}: {reason}", .path.display())]
    SettingsInvalid { path: PathBuf, reason: String },

    /// A persisted file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted file could not be written.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The category rules file is not a JSON object of string arrays.
    #[error("malformed category rules in {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    /// A category name that is not a single plain folder name.
    #[error("invalid category name '{name}': must be a single folder name")]
    InvalidCategoryName { name: String },

    /// The same extension is claimed by two categories.
    #[error("extension '{extension}' is listed under both '{first}' and '{second}'")]
    AmbiguousExtension {
        extension: String,
        first: String,
        second: String,
    },

    #[error("invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),

    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub filters: FilterRules,
}

/// Locations of the files fileforge reads and writes.
///
/// Relative paths are resolved against the working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_categories_file")]
    pub categories_file: PathBuf,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_categories_file() -> PathBuf {
    PathBuf::from("categories.json")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("fileforge_log.txt")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            categories_file: default_categories_file(),
            log_file: default_log_file(),
        }
    }
}

/// Watch mode tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSettings {
    /// How long the queue must stay quiet before a pass starts.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_settle_ms() -> u64 {
    500
}

impl WatchSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
        }
    }
}

/// Rules deciding which files an organize pass skips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether dotfiles are organized too. Defaults to true.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Whitelist that wins over every exclude rule.
    #[serde(default)]
    pub include: IncludeRules,
}

fn default_enable_hidden_files() -> bool {
    true
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

/// Files to leave where they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact file names, e.g. "desktop.ini".
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the file name.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions with or without the dot, compared case-insensitively.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regexes matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns matched against the file name.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Settings {
    /// Loads settings, falling back through the usual locations.
    ///
    /// Lookup order:
    /// 1. `config_path`, when given (it must exist)
    /// 2. `.fileforgerc.toml` in the working directory
    /// 3. `~/.config/fileforge/config.toml`
    /// 4. built-in defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::SettingsNotFound` when an explicit path is missing,
    /// and `ConfigError::SettingsInvalid` when a settings file does not parse.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local = PathBuf::from(LOCAL_SETTINGS_FILE);
        if local.exists() {
            return Self::load_from_file(&local);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_settings = PathBuf::from(home)
                .join(".config")
                .join("fileforge")
                .join("config.toml");
            if home_settings.exists() {
                return Self::load_from_file(&home_settings);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::SettingsNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content).map_err(|reason| ConfigError::SettingsInvalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parses settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}

impl FilterRules {
    /// Compiles the rules into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex pattern is invalid.
    pub fn compile(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self)
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}

/// Filter rules with every pattern compiled once, ready for per-file checks.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            exclude_regexes,
            include_patterns: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Filters that skip nothing at all.
    pub fn allow_all() -> Self {
        Self {
            enable_hidden_files: true,
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }

    /// Returns true when the file should be organized.
    ///
    /// Only the file name takes part in matching, so the same rules apply
    /// wherever the organized folder lives. Include patterns are checked
    /// first and always win. After that a file is skipped if it is hidden
    /// (unless enabled), or matches an excluded name, extension, glob or
    /// regex, in that order.
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches(&file_name))
        {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension()
            && self
                .exclude_extensions
                .contains(&ext.to_string_lossy().to_lowercase())
        {
            return false;
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(&file_name))
        {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }
}

impl Default for CompiledFilters {
    fn default() -> Self {
        Self::allow_all()
    }
}
