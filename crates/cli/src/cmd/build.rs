//! Implementation of the `layercake build` command.
//!
//! Plans a descriptor, reuses the longest cached prefix and executes the
//! rest. Ctrl-C cancels at the next step boundary; steps committed before
//! that stay cached.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use layercake_lib::build::{BuildError, CancelHandle, Orchestrator};
use layercake_lib::cache::{CacheStore, StoreOptions};
use layercake_lib::execute::actions::DirectoryImages;
use layercake_lib::execute::{ExecuteConfig, Executor};
use layercake_lib::plan::BuildDescriptor;

use crate::output::{
  OutputFormat, format_duration, print_info, print_json, print_stat, print_step, print_success, print_warning,
};

#[derive(Debug)]
pub struct BuildArgs {
  pub descriptor: PathBuf,
  pub context: Option<PathBuf>,
  pub timeout: Option<Duration>,
  pub images: Option<PathBuf>,
  pub export: Option<PathBuf>,
}

pub fn cmd_build(store_root: &Path, args: BuildArgs, output: OutputFormat) -> Result<()> {
  let descriptor = BuildDescriptor::load(&args.descriptor)
    .with_context(|| format!("Failed to load build descriptor: {}", args.descriptor.display()))?;
  let context = args
    .context
    .clone()
    .unwrap_or_else(|| args.descriptor.parent().map(Path::to_path_buf).unwrap_or_default());

  let store = CacheStore::open_with(
    store_root,
    StoreOptions {
      command: "build".to_string(),
      ..Default::default()
    },
  )
  .with_context(|| format!("Failed to open cache store: {}", store_root.display()))?;

  let mut config = ExecuteConfig::default();
  if let Some(timeout) = args.timeout {
    config.timeout = timeout;
  }
  let mut executor = Executor::builder().config(config);
  if let Some(images) = &args.images {
    executor = executor.images(DirectoryImages::new(images));
  }
  let orchestrator = Orchestrator::new(store, executor.build());

  if !output.is_json() {
    print_info(&format!("Building {}", args.descriptor.display()));
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let cancel = CancelHandle::new();
  let outcome = rt.block_on(async {
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        on_interrupt.cancel();
      }
    });
    orchestrator.build_descriptor(&descriptor, &context, &cancel).await
  });

  let result = match outcome {
    Ok(result) => result,
    Err(failure) => {
      if output.is_json() {
        print_json(&serde_json::json!({
          "failed_in": failure.failed_in,
          "error": failure.error.to_string(),
          "steps": failure.steps,
        }))?;
      } else {
        for record in &failure.steps {
          print_step(record);
        }
        if matches!(failure.error, BuildError::Cancelled { .. }) {
          print_warning("Build cancelled; completed steps remain cached");
        }
      }
      let message = format!("Build failed while {}", failure.failed_in);
      return Err(anyhow::Error::new(failure).context(message));
    }
  };

  if let Some(dest) = &args.export {
    fs::create_dir_all(dest).with_context(|| format!("Failed to create export directory: {}", dest.display()))?;
    orchestrator
      .store()
      .export(&result.artifact, dest)
      .with_context(|| format!("Failed to export artifact to {}", dest.display()))?;
  }

  if output.is_json() {
    print_json(&result)?;
    return Ok(());
  }

  println!();
  for record in &result.steps {
    print_step(record);
  }
  println!();

  print_success(&format!("Built {}", result.artifact.fingerprint.short()));
  print_stat("Fingerprint", &result.artifact.fingerprint.to_hex());
  print_stat("Cached", &format!("{}/{}", result.hits(), result.steps.len()));
  print_stat("Executed", &result.misses().to_string());
  if let Some(image) = &result.artifact.image {
    print_stat("Base image", image);
  }
  if let Some(entrypoint) = &result.artifact.entrypoint {
    print_stat("Entrypoint", &entrypoint.command.join(" "));
  }
  if let Some(dest) = &args.export {
    print_stat("Exported", &dest.display().to_string());
  }
  print_stat("Duration", &format_duration(result.duration));

  Ok(())
}
