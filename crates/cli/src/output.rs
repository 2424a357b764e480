//! Terminal and JSON rendering for the `plan`, `build` and `snapshot`
//! commands.

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use envbake_lib::pipeline::StepReport;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
}

/// How a path differs between two snapshot trees.
#[derive(Debug, Clone, Copy)]
pub enum PathChange {
  Added,
  Removed,
  Changed,
}

/// First 12 characters of a layer key or content hash.
pub fn short_hash(hash: &str) -> &str {
  hash.get(..12).unwrap_or(hash)
}

/// Human-readable size of a snapshot tree.
pub fn format_size(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// `(+added -removed ~changed)`
pub fn change_summary(added: usize, removed: usize, changed: usize) -> String {
  format!(
    "({}{} {}{} {}{})",
    symbols::ADD,
    added,
    symbols::REMOVE,
    removed,
    symbols::MODIFY,
    changed
  )
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One line per completed pipeline step.
pub fn print_step(report: &StepReport) {
  println!(
    "{} [{}] {} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    report.stage,
    report.description,
    change_summary(report.added, report.removed, report.changed).if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

pub fn print_path_change(change: PathChange, path: &str) {
  match change {
    PathChange::Added => println!("  {} {}", symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()), path),
    PathChange::Removed => println!("  {} {}", symbols::REMOVE.if_supports_color(Stream::Stdout, |s| s.red()), path),
    PathChange::Changed => println!(
      "  {} {}",
      symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
      path
    ),
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
