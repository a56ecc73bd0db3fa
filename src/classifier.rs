/// Extension-based file classification.
///
/// A file belongs to the first category, in rule order, whose extension list
/// contains the file's lowercased extension. Anything else, including files
/// without an extension, falls back to [`FALLBACK_CATEGORY`].
///
/// # Examples
///
/// ```
/// use fileforge::categories::CategoryRules;
/// use fileforge::classifier::classify;
///
/// let rules = CategoryRules::default();
/// assert_eq!(classify("holiday.JPG", &rules), "Images");
/// assert_eq!(classify("thesis.pdf", &rules), "Documents");
/// assert_eq!(classify("Makefile", &rules), "Others");
/// ```
use crate::categories::{CategoryRules, FALLBACK_CATEGORY};
use std::collections::HashMap;
use std::path::Path;

/// Returns the lowercased extension of `file_name` with its leading dot.
///
/// Names without an extension, including dotfiles such as `.bashrc`, yield
/// an empty string.
pub fn extension_of(file_name: &str) -> String {
    match Path::new(file_name).extension() {
        Some(ext) if !ext.is_empty() => format!(".{}", ext.to_string_lossy().to_lowercase()),
        _ => String::new(),
    }
}

/// Classifies a single file name against `rules`.
///
/// Walks the rules in order; use [`Classifier`] when classifying many files
/// against the same rules.
pub fn classify<'r>(file_name: &str, rules: &'r CategoryRules) -> &'r str {
    let extension = extension_of(file_name);
    if extension.is_empty() {
        return FALLBACK_CATEGORY;
    }

    rules
        .iter()
        .find(|rule| rule.contains(&extension))
        .map(|rule| rule.name.as_str())
        .unwrap_or(FALLBACK_CATEGORY)
}

/// Precompiled extension lookup for a rule set.
///
/// When an extension appears in more than one category the earliest
/// category keeps it, so results match [`classify`].
#[derive(Debug, Clone)]
pub struct Classifier<'r> {
    extension_map: HashMap<&'r str, &'r str>,
}

impl<'r> Classifier<'r> {
    pub fn new(rules: &'r CategoryRules) -> Self {
        let mut extension_map = HashMap::new();
        for rule in rules.iter() {
            for ext in &rule.extensions {
                extension_map
                    .entry(ext.as_str())
                    .or_insert(rule.name.as_str());
            }
        }
        Self { extension_map }
    }

    /// Maps an extension (as returned by [`extension_of`]) to its category.
    pub fn extension_to_category(&self, extension: &str) -> Option<&'r str> {
        self.extension_map.get(extension).copied()
    }

    /// Returns the category name for `file_name`.
    pub fn classify(&self, file_name: &str) -> &'r str {
        self.extension_to_category(&extension_of(file_name))
            .unwrap_or(FALLBACK_CATEGORY)
    }
}
