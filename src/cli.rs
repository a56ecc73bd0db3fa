//! Command-line interface for fileforge.
//!
//! This module handles:
//! - Argument parsing (clap)
//! - Loading settings and category rules
//! - Running organize passes, with or without dry run
//! - Watch mode until the user stops it
//! - Editing the category rules
//! - Showing the action log

use crate::action_log::ActionLog;
use crate::categories::{CategoryRules, CategoryStore, FALLBACK_CATEGORY};
use crate::config::Settings;
use crate::organizer::Organizer;
use crate::output::OutputFormatter;
use crate::watcher::WatchTrigger;
use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sort the files of a folder into category and date subfolders.
#[derive(Debug, Parser)]
#[command(name = "fileforge", version, about)]
pub struct Cli {
    /// Settings file (TOML). Defaults to .fileforgerc.toml, then
    /// ~/.config/fileforge/config.toml.
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More diagnostic output (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Organize a folder once.
    Organize {
        /// Folder whose files should be sorted.
        dir: PathBuf,
        /// Show what would be moved without moving anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Organize a folder, then keep organizing it as files arrive.
    Watch {
        dir: PathBuf,
    },
    /// Show or edit the category rules.
    #[command(subcommand)]
    Categories(CategoriesCommand),
    /// Show the most recent moves.
    Log {
        /// Number of entries to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum CategoriesCommand {
    /// List categories in the order they are matched.
    List,
    /// Create a category or replace its extensions.
    Set {
        name: String,
        /// Comma-separated extensions, e.g. "jpg, .png, gif".
        extensions: String,
    },
    /// Delete a category.
    Remove { name: String },
    /// Restore the built-in categories.
    Reset,
}

/// Runs a parsed command line.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use fileforge::cli::{Cli, run};
///
/// let cli = Cli::parse_from(["fileforge", "organize", "/home/me/Downloads", "--dry-run"]);
/// run(cli).expect("organize failed");
/// ```
pub fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Command::Organize { dir, dry_run } => {
            let organizer = build_organizer(&settings)?;
            if dry_run {
                organize_dry_run(&organizer, &dir)
            } else {
                organize_now(&organizer, &dir)
            }
        }
        Command::Watch { dir } => watch(&settings, &dir),
        Command::Categories(command) => edit_categories(&settings, command),
        Command::Log { limit } => show_log(&settings, limit),
    }
}

fn build_organizer(settings: &Settings) -> Result<Organizer> {
    let store = CategoryStore::new(&settings.paths.categories_file);
    let rules = store
        .load()
        .with_context(|| format!("loading categories from {}", store.path().display()))?;
    let filters = settings
        .filters
        .compile()
        .context("compiling file filters")?;

    Ok(Organizer::new(rules, ActionLog::new(&settings.paths.log_file))
        .with_filters(filters)
        .protect(&settings.paths.categories_file)
        .protect(&settings.paths.log_file))
}

/// Runs one pass with a progress bar and prints a per-category summary.
fn organize_now(organizer: &Organizer, dir: &Path) -> Result<()> {
    OutputFormatter::info(&format!("Organizing contents of: {}", dir.display()));

    let total = organizer
        .plan(dir)
        .with_context(|| format!("cannot organize {}", dir.display()))?
        .len();
    if total == 0 {
        OutputFormatter::success("Nothing to organize.");
        return Ok(());
    }

    let pb = OutputFormatter::create_progress_bar(total as u64);
    let report = organizer
        .organize_with(dir, |outcome| {
            match outcome {
                Ok(moved) => pb.println(OutputFormatter::moved_file(dir, moved)),
                Err(failed) => pb.println(OutputFormatter::failed_file(dir, failed)),
            }
            pb.inc(1);
        })
        .with_context(|| format!("cannot organize {}", dir.display()))?;
    pb.finish_and_clear();

    OutputFormatter::summary_table(&report.category_counts(), report.moved.len());

    if report.is_clean() {
        OutputFormatter::success("Files organized successfully!");
    } else {
        OutputFormatter::warning(&format!(
            "{} {} could not be organized. See the errors above.",
            report.failed.len(),
            if report.failed.len() == 1 { "file" } else { "files" }
        ));
    }
    Ok(())
}

fn organize_dry_run(organizer: &Organizer, dir: &Path) -> Result<()> {
    OutputFormatter::dry_run_notice(&format!("Analyzing contents of: {}", dir.display()));

    let plan = organizer
        .plan(dir)
        .with_context(|| format!("cannot analyze {}", dir.display()))?;
    if plan.is_empty() {
        OutputFormatter::info("No files found to organize.");
        return Ok(());
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for operation in &plan {
        OutputFormatter::planned_move(dir, operation);
        *counts.entry(operation.category.clone()).or_insert(0) += 1;
    }

    OutputFormatter::summary_table(&counts, plan.len());
    OutputFormatter::dry_run_notice("No files were moved.");
    Ok(())
}

/// Organizes `dir` once, then watches it until Enter is pressed.
///
/// With stdin closed (e.g. under a service manager) it watches until the
/// process is terminated.
fn watch(settings: &Settings, dir: &Path) -> Result<()> {
    let organizer = Arc::new(build_organizer(settings)?);
    let mut trigger = start_watching(organizer, settings, dir)?;
    OutputFormatter::info(&format!(
        "Watching {} for new files. Press Enter to stop.",
        dir.display()
    ));

    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        loop {
            std::thread::park();
        }
    }

    trigger.stop();
    OutputFormatter::success("Stopped watching folder.");
    Ok(())
}

/// Subscribes to `dir`, then runs the initial pass.
///
/// Files that arrive while the initial pass runs are picked up by the
/// subscription.
fn start_watching(
    organizer: Arc<Organizer>,
    settings: &Settings,
    dir: &Path,
) -> Result<WatchTrigger> {
    let mut trigger = WatchTrigger::new(Arc::clone(&organizer))
        .with_settle_delay(settings.watch.settle_delay())
        .with_listener(|report| {
            for moved in &report.moved {
                println!("{}", OutputFormatter::moved_file(&report.folder, moved));
            }
            for failed in &report.failed {
                eprintln!("{}", OutputFormatter::failed_file(&report.folder, failed));
            }
        });

    trigger
        .start(dir)
        .with_context(|| format!("cannot watch {}", dir.display()))?;
    organize_now(&organizer, dir)?;
    Ok(trigger)
}

fn edit_categories(settings: &Settings, command: CategoriesCommand) -> Result<()> {
    let store = CategoryStore::new(&settings.paths.categories_file);
    let load = || {
        store
            .load()
            .with_context(|| format!("loading categories from {}", store.path().display()))
    };

    let rules = match command {
        CategoriesCommand::List => {
            let rules = load()?;
            OutputFormatter::header(&format!("Categories ({})", store.path().display()));
            OutputFormatter::category_rules(&rules);
            if rules.get(FALLBACK_CATEGORY).is_none() {
                OutputFormatter::info(&format!("Unmatched files go to '{FALLBACK_CATEGORY}'."));
            }
            return Ok(());
        }
        CategoriesCommand::Set { name, extensions } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("category name cannot be empty");
            }
            let mut rules = load()?;
            rules.set(name, CategoryRules::parse_extension_list(&extensions));
            store.save(&rules)?;
            OutputFormatter::success(&format!("Category '{name}' updated."));
            rules
        }
        CategoriesCommand::Remove { name } => {
            let mut rules = load()?;
            if rules.remove(&name).is_none() {
                bail!("no category named '{name}'");
            }
            store.save(&rules)?;
            OutputFormatter::success(&format!("Category '{name}' removed."));
            rules
        }
        // Works even when the current file is corrupt.
        CategoriesCommand::Reset => {
            let rules = CategoryRules::default();
            store.save(&rules)?;
            OutputFormatter::success("Categories reset to defaults.");
            rules
        }
    };

    OutputFormatter::category_rules(&rules);
    Ok(())
}

fn show_log(settings: &Settings, limit: usize) -> Result<()> {
    let log = ActionLog::new(&settings.paths.log_file);
    let entries = log
        .tail(limit)
        .with_context(|| format!("reading {}", log.path().display()))?;

    if entries.is_empty() {
        OutputFormatter::info("No moves recorded yet.");
        return Ok(());
    }
    for entry in &entries {
        OutputFormatter::log_entry(entry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_parse_organize() {
        let cli = Cli::parse_from(["fileforge", "organize", "/tmp/in", "--dry-run"]);
        match cli.command {
            Command::Organize { dir, dry_run } => {
                assert_eq!(dir, PathBuf::from("/tmp/in"));
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["fileforge", "watch", "/tmp/in", "-vv", "-c", "ff.toml"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("ff.toml")));
        assert!(matches!(cli.command, Command::Watch { .. }));
    }

    #[test]
    fn test_parse_categories_set() {
        let cli = Cli::parse_from(["fileforge", "categories", "set", "Books", "epub, mobi"]);
        match cli.command {
            Command::Categories(CategoriesCommand::Set { name, extensions }) => {
                assert_eq!(name, "Books");
                assert_eq!(extensions, "epub, mobi");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_log_limit() {
        let cli = Cli::parse_from(["fileforge", "log"]);
        assert!(matches!(cli.command, Command::Log { limit: 20 }));
        let cli = Cli::parse_from(["fileforge", "log", "-n", "3"]);
        assert!(matches!(cli.command, Command::Log { limit: 3 }));
    }

    #[test]
    fn test_start_watching_runs_initial_pass_and_keeps_watching() {
        let folder = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let settings = Settings::from_toml(&format!(
            "[paths]\ncategories_file = {:?}\nlog_file = {:?}\n\n[watch]\nsettle_ms = 50\n",
            state.path().join("categories.json").display().to_string(),
            state.path().join("log.txt").display().to_string()
        ))
        .unwrap();
        fs::write(folder.path().join("early.pdf"), "doc").unwrap();
        let documents = folder
            .path()
            .join("Documents")
            .join(chrono::Local::now().format("%Y-%m-%d").to_string());

        let organizer = Arc::new(build_organizer(&settings).unwrap());
        let mut trigger = start_watching(organizer, &settings, folder.path()).unwrap();

        assert!(trigger.is_watching());
        assert!(documents.join("early.pdf").is_file());

        fs::write(folder.path().join("late.pdf"), "doc").unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !documents.join("late.pdf").exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(25));
        }
        trigger.stop();
        assert!(documents.join("late.pdf").is_file());
    }

    #[test]
    fn test_start_watching_missing_folder_fails() {
        let state = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.paths.categories_file = state.path().join("categories.json");
        settings.paths.log_file = state.path().join("log.txt");

        let organizer = Arc::new(build_organizer(&settings).unwrap());
        let result = start_watching(organizer, &settings, &state.path().join("missing"));
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
