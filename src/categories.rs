//! Category rules and their JSON persistence.
//!
//! The rules file is a JSON object mapping each category name to the list of
//! extensions it owns. Key order in the file is the order categories are
//! tried during classification:
//!
//! ```json
//! {
//!     "Images": [".jpg", ".png"],
//!     "Documents": [".pdf"],
//!     "Others": []
//! }
//! ```

use crate::config::ConfigError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Name of the catch-all category used when no rule matches.
pub const FALLBACK_CATEGORY: &str = "Others";

/// A single named category and the extensions it claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    pub name: String,
    /// Lowercase extensions, each with its leading dot.
    pub extensions: Vec<String>,
}

impl CategoryRule {
    pub fn contains(&self, extension: &str) -> bool {
        self.extensions.iter().any(|ext| ext == extension)
    }
}

/// Ordered mapping from category name to extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRules {
    rules: Vec<CategoryRule>,
}

impl CategoryRules {
    /// Creates an empty rule set.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryRule> {
        self.rules.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the extensions of a category, if it exists.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| rule.name == name)
            .map(|rule| rule.extensions.as_slice())
    }

    /// Sets the extensions of a category.
    ///
    /// An existing category keeps its position; a new one is appended.
    /// Extensions are normalized: trimmed, lowercased, given a leading dot,
    /// and deduplicated. Blank entries are dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use fileforge::categories::CategoryRules;
    ///
    /// let mut rules = CategoryRules::new();
    /// rules.set("Ebooks", ["EPUB", ".mobi", " ", "epub"]);
    /// assert_eq!(rules.get("Ebooks"), Some(&[".epub".to_string(), ".mobi".to_string()][..]));
    /// ```
    pub fn set<I, S>(&mut self, name: &str, extensions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for ext in extensions {
            if let Some(ext) = normalize_extension(ext.as_ref())
                && !normalized.contains(&ext)
            {
                normalized.push(ext);
            }
        }

        match self.rules.iter_mut().find(|rule| rule.name == name) {
            Some(rule) => rule.extensions = normalized,
            None => self.rules.push(CategoryRule {
                name: name.to_string(),
                extensions: normalized,
            }),
        }
    }

    /// Removes a category, returning its extensions.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let index = self.rules.iter().position(|rule| rule.name == name)?;
        Some(self.rules.remove(index).extensions)
    }

    /// Splits comma-separated user input into extensions.
    ///
    /// ```
    /// use fileforge::categories::CategoryRules;
    ///
    /// assert_eq!(
    ///     CategoryRules::parse_extension_list("jpg, .PNG,,gif "),
    ///     vec!["jpg", ".PNG", "gif"]
    /// );
    /// ```
    pub fn parse_extension_list(input: &str) -> Vec<String> {
        input
            .split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Checks that every category name is a single folder name and that no
    /// extension is claimed by two categories.
    ///
    /// ```
    /// use fileforge::categories::CategoryRules;
    ///
    /// let mut rules = CategoryRules::new();
    /// rules.set("../Escaped", ["jpg"]);
    /// assert!(rules.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for rule in &self.rules {
            if !is_folder_name(&rule.name) {
                return Err(ConfigError::InvalidCategoryName {
                    name: rule.name.clone(),
                });
            }
            for ext in &rule.extensions {
                if let Some(first) = owners.insert(ext.as_str(), rule.name.as_str())
                    && first != rule.name
                {
                    return Err(ConfigError::AmbiguousExtension {
                        extension: ext.clone(),
                        first: first.to_string(),
                        second: rule.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// Category names become one path component below the organized folder.
fn is_folder_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.ends_with(['/', '\\'])
}

fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

impl Default for CategoryRules {
    /// The built-in categories written on first run.
    fn default() -> Self {
        let mut rules = Self::new();
        rules.set("Images", [".jpg", ".jpeg", ".png", ".gif", ".bmp"]);
        rules.set("Documents", [".pdf", ".docx", ".txt", ".xlsx", ".pptx"]);
        rules.set("Videos", [".mp4", ".mov", ".avi", ".mkv"]);
        rules.set("Music", [".mp3", ".wav", ".aac"]);
        rules.set("Archives", [".zip", ".rar", ".7z", ".tar"]);
        rules.set(FALLBACK_CATEGORY, Vec::<String>::new());
        rules
    }
}

impl Serialize for CategoryRules {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rules.len()))?;
        for rule in &self.rules {
            map.serialize_entry(&rule.name, &rule.extensions)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CategoryRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(CategoryRulesVisitor)
    }
}

struct CategoryRulesVisitor;

impl<'de> Visitor<'de> for CategoryRulesVisitor {
    type Value = CategoryRules;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object mapping category names to arrays of extensions")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut rules = CategoryRules::new();
        while let Some((name, extensions)) = access.next_entry::<String, Vec<String>>()? {
            if rules.get(&name).is_some() {
                return Err(serde::de::Error::custom(format!(
                    "duplicate category '{name}'"
                )));
            }
            rules.set(&name, extensions);
        }
        Ok(rules)
    }
}

/// Reads and writes the category rules file.
#[derive(Debug, Clone)]
pub struct CategoryStore {
    path: PathBuf,
}

impl CategoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted rules, materializing the defaults on first use.
    ///
    /// A file that exists but cannot be parsed is an error; it is never
    /// replaced with defaults, so hand edits are not lost.
    ///
    /// # Errors
    ///
    /// * `ConfigError::Read` if the file cannot be read
    /// * `ConfigError::Malformed` if it is not an object of string arrays
    /// * `ConfigError::AmbiguousExtension` if two categories share an extension
    /// * `ConfigError::Write` if the defaults cannot be written
    pub fn load(&self) -> Result<CategoryRules, ConfigError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no category rules found, writing defaults");
            let defaults = CategoryRules::default();
            self.save(&defaults)?;
            return Ok(defaults);
        }

        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;

        let rules: CategoryRules =
            serde_json::from_str(&content).map_err(|e| ConfigError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        rules.validate()?;

        debug!(path = %self.path.display(), categories = rules.len(), "loaded category rules");
        Ok(rules)
    }

    /// Replaces the persisted rules with `rules`.
    ///
    /// The file is written to a temporary sibling and renamed into place, so
    /// readers see either the old or the new rule set.
    pub fn save(&self, rules: &CategoryRules) -> Result<(), ConfigError> {
        rules.validate()?;

        let write_error = |source: std::io::Error| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        rules
            .serialize(&mut serializer)
            .map_err(|e| write_error(std::io::Error::other(e)))?;
        buffer.push(b'\n');

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(write_error)?;

        let mut staged = NamedTempFile::new_in(&dir).map_err(write_error)?;
        staged.write_all(&buffer).map_err(write_error)?;
        staged
            .persist(&self.path)
            .map_err(|e| write_error(e.error))?;

        debug!(path = %self.path.display(), categories = rules.len(), "saved category rules");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_rules_order() {
        let rules = CategoryRules::default();
        let names: Vec<_> = rules.names().collect();
        assert_eq!(
            names,
            vec!["Images", "Documents", "Videos", "Music", "Archives", "Others"]
        );
        assert_eq!(rules.get(FALLBACK_CATEGORY), Some(&[][..]));
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut rules = CategoryRules::default();
        rules.set("Music", ["flac", "ogg"]);

        let names: Vec<_> = rules.names().collect();
        assert_eq!(names[3], "Music");
        assert_eq!(
            rules.get("Music"),
            Some(&[".flac".to_string(), ".ogg".to_string()][..])
        );
    }

    #[test]
    fn test_set_appends_new_category() {
        let mut rules = CategoryRules::default();
        rules.set("Fonts", [".ttf", ".OTF"]);
        assert_eq!(rules.names().last(), Some("Fonts"));
        assert_eq!(rules.len(), 7);
    }

    #[test]
    fn test_remove_category() {
        let mut rules = CategoryRules::default();
        assert!(rules.remove("Videos").is_some());
        assert!(rules.remove("Videos").is_none());
        assert!(rules.get("Videos").is_none());
    }

    #[test]
    fn test_validate_rejects_shared_extension() {
        let mut rules = CategoryRules::default();
        rules.set("Screenshots", [".png"]);

        match rules.validate() {
            Err(ConfigError::AmbiguousExtension {
                extension,
                first,
                second,
            }) => {
                assert_eq!(extension, ".png");
                assert_eq!(first, "Images");
                assert_eq!(second, "Screenshots");
            }
            other => panic!("expected ambiguity error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_names_that_are_not_one_folder() {
        for name in ["", "..", ".", "../escaped", "/tmp/abs", "Images/Raw", "Images/"] {
            let mut rules = CategoryRules::new();
            rules.set(name, [".jpg"]);
            assert!(
                matches!(
                    rules.validate(),
                    Err(ConfigError::InvalidCategoryName { .. })
                ),
                "{name:?} should be rejected"
            );
        }

        let mut rules = CategoryRules::new();
        rules.set("Photos 2024", [".jpg"]);
        rules.set(".Hidden Stuff", [".bin"]);
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_escaping_category() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categories.json");
        fs::write(&path, r#"{"../escaped": [".jpg"]}"#).unwrap();

        let result = CategoryStore::new(&path).load();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidCategoryName { name }) if name == "../escaped"
        ));
    }

    #[test]
    fn test_json_keeps_key_order() {
        let json = r#"{"Zips": [".zip"], "Audio": [".mp3"], "Art": [".png"]}"#;
        let rules: CategoryRules = serde_json::from_str(json).unwrap();
        let names: Vec<_> = rules.names().collect();
        assert_eq!(names, vec!["Zips", "Audio", "Art"]);
    }

    #[test]
    fn test_json_duplicate_category_rejected() {
        let json = r#"{"Images": [".png"], "Images": [".jpg"]}"#;
        assert!(serde_json::from_str::<CategoryRules>(json).is_err());
    }

    #[test]
    fn test_json_wrong_shape_rejected() {
        assert!(serde_json::from_str::<CategoryRules>(r#"{"Images": ".png"}"#).is_err());
        assert!(serde_json::from_str::<CategoryRules>(r#"[".png"]"#).is_err());
    }

    #[test]
    fn test_load_materializes_defaults() {
        let dir = TempDir::new().unwrap();
        let store = CategoryStore::new(dir.path().join("categories.json"));

        let rules = store.load().unwrap();
        assert_eq!(rules, CategoryRules::default());
        assert!(store.path().exists());

        let written = fs::read_to_string(store.path()).unwrap();
        assert!(written.starts_with("{\n    \"Images\": [\n        \".jpg\""));
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CategoryStore::new(dir.path().join("nested").join("rules.json"));

        let mut rules = CategoryRules::new();
        rules.set("Code", [".rs", ".toml"]);
        rules.set("Books", [".epub"]);
        rules.set(FALLBACK_CATEGORY, Vec::<String>::new());
        store.save(&rules).unwrap();

        assert_eq!(store.load().unwrap(), rules);
    }

    #[test]
    fn test_save_overwrites_previous_rules() {
        let dir = TempDir::new().unwrap();
        let store = CategoryStore::new(dir.path().join("categories.json"));
        store.save(&CategoryRules::default()).unwrap();

        let mut replacement = CategoryRules::new();
        replacement.set("Only", [".one"]);
        store.save(&replacement).unwrap();

        assert_eq!(store.load().unwrap(), replacement);
    }

    #[test]
    fn test_save_rejects_ambiguous_rules() {
        let dir = TempDir::new().unwrap();
        let store = CategoryStore::new(dir.path().join("categories.json"));

        let mut rules = CategoryRules::new();
        rules.set("A", [".x"]);
        rules.set("B", [".x"]);
        assert!(store.save(&rules).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_load_corrupt_file_is_error_and_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categories.json");
        fs::write(&path, "{ not json").unwrap();

        let store = CategoryStore::new(&path);
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_load_normalizes_hand_edits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categories.json");
        fs::write(&path, r#"{"Images": ["JPG", ".Png"]}"#).unwrap();

        let rules = CategoryStore::new(&path).load().unwrap();
        assert_eq!(
            rules.get("Images"),
            Some(&[".jpg".to_string(), ".png".to_string()][..])
        );
    }
}
