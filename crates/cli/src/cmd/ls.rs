use std::path::Path;

use anyhow::{Context, Result};

use layercake_lib::cache::{CacheStore, StoreOptions};

use crate::output::{OutputFormat, format_bytes, format_timestamp, print_info, print_json, print_stat};

pub fn cmd_ls(store_root: &Path, output: OutputFormat) -> Result<()> {
  let store = CacheStore::open_with(
    store_root,
    StoreOptions {
      command: "ls".to_string(),
      ..Default::default()
    },
  )
  .with_context(|| format!("Failed to open cache store: {}", store_root.display()))?;
  let entries = store.list().context("Failed to list cache entries")?;

  if output.is_json() {
    return print_json(&entries);
  }

  if entries.is_empty() {
    print_info("Cache is empty");
    return Ok(());
  }

  for entry in &entries {
    println!(
      "  {} {:<22} {:>10}  {}",
      entry.fingerprint.short(),
      entry.kind.as_str(),
      format_bytes(entry.size_bytes),
      format_timestamp(entry.last_used_unix_ms)
    );
  }
  println!();
  print_stat("Entries", &entries.len().to_string());
  print_stat(
    "Total size",
    &format_bytes(entries.iter().map(|e| e.size_bytes).sum()),
  );
  Ok(())
}
