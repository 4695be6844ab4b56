//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, human-readable byte/duration formatting, and per-step build lines.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use layercake_lib::build::{CacheStatus, StepRecord};

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

mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const HIT: &str = "=";
  pub const MISS: &str = "+";
}

/// Binary units, one decimal place from KiB upwards.
pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// Step timings: milliseconds below a second, then seconds, then minutes.
pub fn format_duration(duration: Duration) -> String {
  match duration.as_secs() {
    0 => format!("{}ms", duration.as_millis()),
    secs @ 1..60 => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    secs => format!("{}m {}s", secs / 60, secs % 60),
  }
}

/// Render a unix-millisecond timestamp as an RFC 3339 UTC time (seconds precision).
pub fn format_timestamp(unix_ms: u64) -> String {
  let time = std::time::UNIX_EPOCH + Duration::from_millis(unix_ms);
  humantime::format_rfc3339_seconds(time).to_string()
}

pub fn print_success(message: &str) {
  let mark = symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green());
  println!("{} {}", mark, message);
}

pub fn print_info(message: &str) {
  let mark = symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue());
  println!("{} {}", mark, message);
}

pub fn print_warning(message: &str) {
  let mark = symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow());
  eprintln!("{} {}", mark, message.if_supports_color(Stream::Stderr, |s| s.yellow()));
}

pub fn print_error(message: &str) {
  let mark = symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red());
  eprintln!("{} {}", mark, message.if_supports_color(Stream::Stderr, |s| s.red()));
}

/// An indented `label: value` line under a heading.
pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// One line per build step: status, index, kind, fingerprint, duration.
pub fn print_step(record: &StepRecord) {
  let status = match record.status {
    CacheStatus::Hit => format!("{} hit ", symbols::HIT)
      .if_supports_color(Stream::Stdout, |s| s.green())
      .to_string(),
    CacheStatus::Miss => format!("{} miss", symbols::MISS)
      .if_supports_color(Stream::Stdout, |s| s.yellow())
      .to_string(),
  };
  println!(
    "  {} [{}] {:<22} {} {}",
    status,
    record.index,
    record.kind.as_str(),
    record.fingerprint.short().if_supports_color(Stream::Stdout, |s| s.dimmed()),
    format_duration(record.duration)
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
