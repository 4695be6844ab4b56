use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use layercake_lib::cache::{CacheStore, EvictPolicy, StoreOptions};
use layercake_lib::store_lock::LockMode;

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

#[derive(Debug, Default)]
pub struct GcArgs {
  pub max_size: Option<u64>,
  pub max_age: Option<Duration>,
  pub max_entries: Option<usize>,
  pub dry_run: bool,
}

pub fn cmd_gc(store_root: &Path, args: GcArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let store = CacheStore::open_with(
    store_root,
    StoreOptions {
      lock_mode: LockMode::Exclusive,
      command: "gc".to_string(),
      ..Default::default()
    },
  )
  .context("Failed to acquire store lock")?;

  let policy = EvictPolicy {
    max_age: args.max_age,
    max_size_bytes: args.max_size,
    max_entries: args.max_entries,
    dry_run: args.dry_run,
    ..Default::default()
  };
  let stats = store.evict(&policy).context("Failed to evict cache entries")?;

  if output.is_json() {
    print_json(&stats)?;
  } else {
    println!();
    if args.dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Entries scanned", &stats.scanned.to_string());
    print_stat("Entries evicted", &stats.evicted.to_string());
    if stats.skipped_in_use > 0 {
      print_stat("Skipped (in use)", &stats.skipped_in_use.to_string());
    }
    if stats.invalid_removed > 0 {
      print_stat("Incomplete removed", &stats.invalid_removed.to_string());
    }
    print_stat("Space freed", &format_bytes(stats.bytes_freed));
    print_stat(
      "Remaining",
      &format!("{} entries, {}", stats.remaining_entries, format_bytes(stats.remaining_bytes)),
    );
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
