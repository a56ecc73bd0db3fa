//! fileforge - keep a folder tidy by sorting its files into categories
//!
//! This library classifies files by extension using user-editable category
//! rules, moves them into `<category>/<YYYY-MM-DD>/` subfolders, records
//! every move in an append-only log, and can watch a folder to re-run the
//! organizer whenever new files arrive.

pub mod action_log;
pub mod categories;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod organizer;
pub mod output;
pub mod watcher;

pub use action_log::{ActionLog, LogEntry};
pub use categories::{CategoryRules, CategoryStore, FALLBACK_CATEGORY};
pub use classifier::{Classifier, classify};
pub use config::{CompiledFilters, ConfigError, Settings};
pub use organizer::{FileMoveOperation, OrganizeError, OrganizeReport, Organizer};
pub use watcher::{WatchError, WatchTrigger};

pub use cli::{Cli, run};
