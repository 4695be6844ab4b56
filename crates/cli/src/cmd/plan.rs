//! Implementation of the `layercake plan` command.
//!
//! Prints the fingerprint chain of a descriptor and which steps a build would
//! take from the cache. Nothing is executed.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use layercake_lib::build::{Orchestrator, ProbeRecord};
use layercake_lib::cache::{CacheStore, StoreOptions};
use layercake_lib::execute::{ExecuteConfig, Executor};
use layercake_lib::plan::plan_file;

use crate::output::{OutputFormat, print_info, print_json, print_stat};

#[derive(Serialize)]
struct PlanReport<'a> {
  fingerprint: String,
  steps: &'a [ProbeRecord],
}

pub fn cmd_plan(store_root: &Path, descriptor: &Path, context: Option<&Path>, output: OutputFormat) -> Result<()> {
  let plan = plan_file(descriptor, context).with_context(|| format!("Failed to plan {}", descriptor.display()))?;

  let store = CacheStore::open_with(
    store_root,
    StoreOptions {
      command: "plan".to_string(),
      ..Default::default()
    },
  )
  .with_context(|| format!("Failed to open cache store: {}", store_root.display()))?;
  let orchestrator = Orchestrator::new(store, Executor::new(ExecuteConfig::default()));
  let probe = orchestrator.probe(&plan).context("Failed to probe cache store")?;

  let fingerprint = plan.final_fingerprint().to_hex();
  if output.is_json() {
    return print_json(&PlanReport {
      fingerprint,
      steps: &probe,
    });
  }

  print_info(&format!("Plan: {}", fingerprint));
  for record in &probe {
    let status = if record.reusable {
      "reuse".if_supports_color(Stream::Stdout, |s| s.green()).to_string()
    } else {
      "run  ".if_supports_color(Stream::Stdout, |s| s.yellow()).to_string()
    };
    println!(
      "  {} [{}] {:<22} {}",
      status,
      record.index,
      record.kind.as_str(),
      record.fingerprint.short()
    );
  }

  let reusable = probe.iter().filter(|r| r.reusable).count();
  print_stat("Reusable", &format!("{}/{}", reusable, probe.len()));
  Ok(())
}
