use std::path::Path;

use anyhow::{Context, Result};

use layercake_lib::cache::{CacheStore, StoreOptions};

use crate::output::{OutputFormat, format_bytes, print_json, print_stat};

pub fn cmd_info(store_root: &Path, output: OutputFormat) -> Result<()> {
  let store = CacheStore::open_with(
    store_root,
    StoreOptions {
      command: "info".to_string(),
      ..Default::default()
    },
  )
  .with_context(|| format!("Failed to open cache store: {}", store_root.display()))?;
  let entries = store.list().context("Failed to list cache entries")?;
  let total: u64 = entries.iter().map(|e| e.size_bytes).sum();

  if output.is_json() {
    return print_json(&serde_json::json!({
      "store": store.root(),
      "entries": entries.len(),
      "size_bytes": total,
      "version": env!("CARGO_PKG_VERSION"),
    }));
  }

  println!("Store:");
  print_stat("Location", &store.root().display().to_string());
  print_stat("Entries", &entries.len().to_string());
  print_stat("Size", &format_bytes(total));
  println!("Platform:");
  print_stat("Target", &format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS));
  Ok(())
}
