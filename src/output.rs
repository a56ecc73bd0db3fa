//! Terminal output for the command-line interface.
//!
//! All user-facing text goes through [`OutputFormatter`] so that colors,
//! symbols and the layout of tables stay consistent between commands.
//! Diagnostics meant for troubleshooting go through `tracing` instead.

use crate::action_log::LogEntry;
use crate::categories::CategoryRules;
use crate::organizer::{FailedMove, FileMoveOperation, MovedFile};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::Path;

/// Styled printing helpers.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a green success line with a checkmark.
    ///
    /// ```no_run
    /// use fileforge::output::OutputFormatter;
    /// OutputFormatter::success("Files organized successfully!");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints a red error line to stderr.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// One line for a file that was moved, relative to the organized folder.
    pub fn moved_file(folder: &Path, moved: &MovedFile) -> String {
        format!(
            "{} {} → {}",
            "✓".green(),
            display_relative(folder, &moved.operation.source),
            display_relative(folder, &moved.operation.destination).cyan()
        )
    }

    /// One line for a file that stayed where it was.
    pub fn failed_file(folder: &Path, failed: &FailedMove) -> String {
        format!(
            "{} {}: {}",
            "✗".red(),
            display_relative(folder, &failed.operation.source),
            failed.error
        )
    }

    /// Prints a planned move during a dry run.
    pub fn planned_move(folder: &Path, operation: &FileMoveOperation) {
        println!(
            " - {}\n   → Would move to {}",
            display_relative(folder, &operation.source),
            display_relative(folder, &operation.destination).cyan()
        );
    }

    /// Prints a log entry, dimming the timestamp.
    pub fn log_entry(entry: &LogEntry) {
        println!(
            "{} {} → {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            entry.source.display(),
            entry.destination.display().to_string().cyan()
        );
    }

    /// Prints the category rules in classification order.
    pub fn category_rules(rules: &CategoryRules) {
        let width = rules.names().map(str::len).max().unwrap_or(0).max(8);
        for rule in rules.iter() {
            let extensions = if rule.extensions.is_empty() {
                "(fallback only)".dimmed().to_string()
            } else {
                rule.extensions.join(", ")
            };
            println!("{:<width$}  {}", rule.name.bold(), extensions, width = width);
        }
    }

    /// Creates a progress bar for an organize pass over `total` files.
    ///
    /// ```no_run
    /// use fileforge::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(12);
    /// pb.inc(1);
    /// pb.finish_and_clear();
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Prints a per-category table of moved files.
    ///
    /// ```no_run
    /// use fileforge::output::OutputFormatter;
    /// use std::collections::HashMap;
    ///
    /// let mut counts = HashMap::new();
    /// counts.insert("Documents".to_string(), 15);
    /// counts.insert("Images".to_string(), 8);
    /// OutputFormatter::summary_table(&counts, 23);
    /// ```
    pub fn summary_table(category_counts: &HashMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let mut categories: Vec<_> = category_counts.iter().collect();
        categories.sort_by_key(|&(name, _)| name);

        let width = categories
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max(8);

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));

        for (category, count) in &categories {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural_files(**count),
                width = width
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural_files(total_files),
            width = width
        );
    }
}

fn plural_files(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

fn display_relative(folder: &Path, path: &Path) -> String {
    path.strip_prefix(folder)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_display_relative() {
        let folder = Path::new("/home/me/Downloads");
        assert_eq!(
            display_relative(folder, Path::new("/home/me/Downloads/Images/2024-01-01/a.jpg")),
            PathBuf::from("Images/2024-01-01/a.jpg").display().to_string()
        );
        assert_eq!(
            display_relative(folder, Path::new("/elsewhere/b.jpg")),
            "/elsewhere/b.jpg"
        );
    }

    #[test]
    fn test_plural_files() {
        assert_eq!(plural_files(1), "file");
        assert_eq!(plural_files(0), "files");
        assert_eq!(plural_files(7), "files");
    }
}
