//! Build orchestration.
//!
//! The [`Orchestrator`] drives one build through
//! `Planning → Probing → Executing → Finalizing → {Succeeded, Failed}`:
//!
//! - **Probing** looks up each step's fingerprint in order and stops at the
//!   first miss. Only the longest cached prefix is reused; once a step
//!   misses, every later step executes, since its base is the missed step's
//!   fresh output.
//! - **Executing** replays the cached prefix into a working filesystem, then
//!   runs the remaining steps one at a time, committing each artifact as soon
//!   as it is produced. A failure later in the build leaves those commits in
//!   place, so a retry resumes from the last committed step.
//! - **Finalizing** folds every layer into the [`ComposedArtifact`] returned
//!   in the [`BuildResult`].
//!
//! Builds sharing an orchestrator coordinate through per-fingerprint locks:
//! a build that reaches a fingerprint another build is producing waits for
//! that commit and then hits the cache.
//!
//! # Submodules
//!
//! - [`types`] - build state, results, errors and cancellation

mod inflight;
mod types;

pub use types::*;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::cache::{Artifact, CacheStore, CacheStoreError, CachedArtifact, ComposedArtifact, Lease};
use crate::execute::{ActionError, ExecuteError, Executor, Rootfs, blocking};
use crate::fingerprint::Fingerprint;
use crate::plan::{self, BuildDescriptor, BuildPlan, BuildStep, PlanError, StepKind};
use inflight::InflightTable;

/// Whether a step would be served from the cache, without running anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
  pub index: usize,
  pub kind: StepKind,
  pub fingerprint: Fingerprint,
  /// A valid entry exists for this fingerprint.
  pub cached: bool,
  /// Cached and on the cached prefix, so a build would reuse it.
  pub reusable: bool,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
  store: CacheStore,
  executor: Executor,
  inflight: Arc<InflightTable>,
  config: BuildConfig,
}

/// Per-build bookkeeping, turned into a [`BuildResult`] or [`BuildFailure`].
struct Progress {
  state: BuildState,
  records: Vec<StepRecord>,
  started: Instant,
}

impl Progress {
  fn new() -> Self {
    Self {
      state: BuildState::Planning,
      records: Vec::new(),
      started: Instant::now(),
    }
  }

  fn enter(&mut self, state: BuildState) {
    debug!(from = %self.state, to = %state, "build state");
    self.state = state;
  }

  fn fail(mut self, error: impl Into<BuildError>) -> BuildFailure {
    let error = error.into();
    let failed_in = self.state;
    self.enter(BuildState::Failed);
    error!(state = %failed_in, completed = self.records.len(), "build failed: {}", error);
    BuildFailure {
      error,
      failed_in,
      steps: self.records,
    }
  }
}

impl Orchestrator {
  pub fn new(store: CacheStore, executor: Executor) -> Self {
    Self::with_config(store, executor, BuildConfig::default())
  }

  pub fn with_config(store: CacheStore, executor: Executor, config: BuildConfig) -> Self {
    Self {
      store,
      executor,
      inflight: Arc::new(InflightTable::default()),
      config,
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn executor(&self) -> &Executor {
    &self.executor
  }

  /// Plan `descriptor` against `context_dir` and build it.
  pub async fn build_descriptor(
    &self,
    descriptor: &BuildDescriptor,
    context_dir: &Path,
    cancel: &CancelHandle,
  ) -> Result<BuildResult, BuildFailure> {
    let progress = Progress::new();
    let plan = match plan::plan(descriptor, context_dir) {
      Ok(plan) => plan,
      Err(e) => return Err(progress.fail(e)),
    };
    self.run(&plan, progress, cancel).await
  }

  /// Build an already planned chain.
  pub async fn build(&self, plan: &BuildPlan, cancel: &CancelHandle) -> Result<BuildResult, BuildFailure> {
    self.run(plan, Progress::new(), cancel).await
  }

  /// Report which steps of `plan` a build would reuse. Does not lease
  /// entries or update their last-used time.
  pub fn probe(&self, plan: &BuildPlan) -> Result<Vec<ProbeRecord>, CacheStoreError> {
    let mut on_prefix = true;
    let mut records = Vec::with_capacity(plan.len());
    for step in plan.steps() {
      let cached = self.store.contains(&step.fingerprint)?;
      on_prefix &= cached;
      records.push(ProbeRecord {
        index: step.index,
        kind: step.kind,
        fingerprint: step.fingerprint,
        cached,
        reusable: on_prefix,
      });
    }
    Ok(records)
  }

  async fn run(&self, plan: &BuildPlan, mut progress: Progress, cancel: &CancelHandle) -> Result<BuildResult, BuildFailure> {
    info!(
      steps = plan.len(),
      fingerprint = %plan.final_fingerprint().short(),
      "starting build"
    );

    progress.enter(BuildState::Probing);
    let mut prefix: Vec<CachedArtifact> = Vec::new();
    let mut first_miss: Option<usize> = None;
    let mut guard: Option<OwnedMutexGuard<()>> = None;

    for step in plan.steps() {
      if cancel.is_cancelled() {
        return Err(progress.fail(BuildError::Cancelled { step: step.index }));
      }

      let started = Instant::now();
      // hand-over-hand: the previous step's lock is released only once this one is held
      guard = self.claim(&step.fingerprint).await;
      let store = self.store.clone();
      let fingerprint = step.fingerprint;
      let found = blocking("look up", self.store.root(), move || Ok(store.lookup(&fingerprint)?)).await;
      match found {
        Ok(Some(cached)) => {
          debug!(step = step.index, kind = %step.kind, fingerprint = %step.fingerprint.short(), "step cached");
          progress.records.push(StepRecord {
            index: step.index,
            kind: step.kind,
            fingerprint: step.fingerprint,
            status: CacheStatus::Hit,
            duration: started.elapsed(),
            commit: None,
          });
          prefix.push(cached);
        }
        Ok(None) => {
          first_miss = Some(step.index);
          break;
        }
        Err(e) => return Err(progress.fail(ExecuteError::new(step, e))),
      }
    }

    info!(hits = prefix.len(), total = plan.len(), "cached prefix");
    let mut executed: Vec<Artifact> = Vec::new();
    // leases on every step this build executes, held until the result is composed
    let mut pinned: Vec<Lease> = Vec::new();

    if let Some(start) = first_miss {
      progress.enter(BuildState::Executing);

      let scratch = self.executor.config().scratch_dir.clone();
      let scratch_root = scratch.clone().unwrap_or_else(std::env::temp_dir);
      let layers = prefix.clone();
      let materialized = blocking("materialize rootfs in", &scratch_root, move || {
        Rootfs::materialize(&layers, scratch.as_deref())
      })
      .await;
      let rootfs = match materialized {
        Ok(rootfs) => rootfs,
        Err(e) => return Err(progress.fail(ExecuteError::new(&plan.steps()[start], e))),
      };

      for step in &plan.steps()[start..] {
        if cancel.is_cancelled() {
          return Err(progress.fail(BuildError::Cancelled { step: step.index }));
        }
        if step.index != start {
          guard = self.claim(&step.fingerprint).await;
        }

        let started = Instant::now();
        pinned.push(self.store.lease(&step.fingerprint));
        let staging = match self.store.stage(&step.fingerprint) {
          Ok(staging) => staging,
          Err(e) => return Err(progress.fail(store_failure(step, e))),
        };
        let staged = match self.executor.execute(step, &rootfs, plan.context_dir(), staging).await {
          Ok(staged) => staged,
          Err(e) => return Err(progress.fail(e)),
        };

        if cancel.is_cancelled() {
          warn!(step = step.index, "build cancelled, discarding uncommitted artifact");
          return Err(progress.fail(BuildError::Cancelled { step: step.index }));
        }

        let artifact = staged.artifact.clone();
        let store = self.store.clone();
        let outcome = match blocking("commit into", self.store.root(), move || Ok(store.commit(staged)?)).await {
          Ok(outcome) => outcome,
          Err(e) => return Err(progress.fail(ExecuteError::new(step, e))),
        };

        progress.records.push(StepRecord {
          index: step.index,
          kind: step.kind,
          fingerprint: step.fingerprint,
          status: CacheStatus::Miss,
          duration: started.elapsed(),
          commit: Some(outcome),
        });
        executed.push(artifact);
      }
    }

    drop(guard);

    progress.enter(BuildState::Finalizing);
    let layers = prefix.iter().map(CachedArtifact::artifact).chain(executed.iter());
    let Some(artifact) = ComposedArtifact::compose(layers) else {
      return Err(progress.fail(PlanError::EmptyPlan));
    };
    drop(pinned);

    let result = BuildResult {
      artifact,
      steps: std::mem::take(&mut progress.records),
      duration: progress.started.elapsed(),
    };
    progress.enter(BuildState::Succeeded);
    info!(
      fingerprint = %result.artifact.fingerprint.short(),
      hits = result.hits(),
      misses = result.misses(),
      elapsed_ms = result.duration.as_millis() as u64,
      "build succeeded"
    );
    Ok(result)
  }

  async fn claim(&self, fingerprint: &Fingerprint) -> Option<OwnedMutexGuard<()>> {
    if self.config.wait_for_inflight {
      Some(self.inflight.acquire(*fingerprint).await)
    } else {
      None
    }
  }
}

/// Store failures during a build are attributed to the step being processed,
/// so a retry re-executes it.
fn store_failure(step: &BuildStep, e: CacheStoreError) -> ExecuteError {
  ExecuteError::new(step, ActionError::CacheStore(e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CommitOutcome, EvictPolicy, EvictStats, FsEntry};
  use crate::execute::actions::{InstallAction, InstallRequest};
  use crate::execute::{ExecuteConfig, PackageManager};
  use crate::plan::StepDraft;
  use crate::util::testutil::{read, sleep_cmd, write_file_cmd, write_tree};
  use async_trait::async_trait;
  use std::collections::BTreeSet;
  use std::time::Duration;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  use CacheStatus::{Hit, Miss};

  struct Fixture {
    _root: TempDir,
    ctx: TempDir,
    store: CacheStore,
  }

  impl Fixture {
    fn new() -> Self {
      let root = TempDir::new().unwrap();
      let ctx = TempDir::new().unwrap();
      write_tree(
        ctx.path(),
        &[("requirements.txt", "reqs-v1"), ("src/main.py", "src-v1")],
      );
      let store = CacheStore::open(root.path()).unwrap();
      Fixture { _root: root, ctx, store }
    }

    fn orchestrator(&self) -> Orchestrator {
      Orchestrator::new(self.store.clone(), Executor::new(ExecuteConfig::default()))
    }

    fn plan(&self, drafts: Vec<StepDraft>) -> BuildPlan {
      BuildPlan::from_drafts(self.ctx.path(), drafts).unwrap()
    }

    /// base-image, dependency-install keyed on requirements.txt, file-copy of src.
    fn python_plan(&self) -> BuildPlan {
      self.plan(vec![
        StepDraft::base_image("py:3.12"),
        StepDraft::dependencies(write_file_cmd("site-packages.txt", "installed")).with_file("requirements.txt"),
        StepDraft::file_copy(["src"], "/app/"),
      ])
    }
  }

  async fn build(orchestrator: &Orchestrator, plan: &BuildPlan) -> BuildResult {
    orchestrator.build(plan, &CancelHandle::new()).await.unwrap()
  }

  #[tokio::test]
  async fn rebuild_hits_and_changed_input_invalidates_suffix() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();

    let first = build(&orchestrator, &fx.python_plan()).await;
    assert_eq!(first.statuses(), vec![Miss, Miss, Miss]);
    assert!(first.steps.iter().all(|s| s.commit == Some(CommitOutcome::Committed)));
    assert_eq!(fx.store.list().unwrap().len(), 3);

    let second = build(&orchestrator, &fx.python_plan()).await;
    assert_eq!(second.statuses(), vec![Hit, Hit, Hit]);
    assert_eq!(second.artifact, first.artifact);

    write_tree(fx.ctx.path(), &[("requirements.txt", "reqs-v2")]);
    let third = build(&orchestrator, &fx.python_plan()).await;
    assert_eq!(third.statuses(), vec![Hit, Miss, Miss]);
    assert_ne!(third.artifact.fingerprint, first.artifact.fingerprint);
    assert_eq!(third.artifact.files.keys().collect::<Vec<_>>(), first.artifact.files.keys().collect::<Vec<_>>());
  }

  #[tokio::test]
  async fn changing_step_k_keeps_earlier_hits() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let drafts = || {
      vec![
        StepDraft::base_image("scratch"),
        StepDraft::system_packages(write_file_cmd("tool", "v1")),
        StepDraft::file_copy(["src"], "/app/"),
        StepDraft::entrypoint(["python", "/app/main.py"]),
      ]
    };

    build(&orchestrator, &fx.plan(drafts())).await;
    write_tree(fx.ctx.path(), &[("src/main.py", "src-v2")]);
    let rebuilt = build(&orchestrator, &fx.plan(drafts())).await;

    assert_eq!(rebuilt.statuses(), vec![Hit, Hit, Miss, Miss]);
    // the cached install layer is replayed underneath the fresh copy
    assert!(rebuilt.artifact.files.contains_key("tool"));
    assert_eq!(rebuilt.artifact.entrypoint.unwrap().command, vec!["python", "/app/main.py"]);

    let dest = TempDir::new().unwrap();
    fx.store.export(&build(&orchestrator, &fx.plan(drafts())).await.artifact, dest.path()).unwrap();
    assert_eq!(read(dest.path(), "app/main.py"), "src-v2");
    assert_eq!(read(dest.path(), "tool"), "v1");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn retry_after_failure_resumes_from_failed_step() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let gate = TempDir::new().unwrap();
    let marker = gate.path().join("ready");
    let drafts = || {
      vec![
        StepDraft::base_image("scratch"),
        StepDraft::dependencies(write_file_cmd("deps", "ok")),
        StepDraft::system_packages(crate::util::testutil::shell_cmd(&format!(
          "test -f '{}' && printf done > pkgs",
          marker.display()
        ))),
        StepDraft::file_copy(["src"], "/app/"),
      ]
    };

    let failure = orchestrator.build(&fx.plan(drafts()), &CancelHandle::new()).await.unwrap_err();
    let BuildError::Execution(ref cause) = failure.error else {
      panic!("expected execution failure, got {}", failure.error);
    };
    assert_eq!(cause.step, 2);
    assert!(matches!(cause.cause, ActionError::CommandFailed { .. }));
    assert_eq!(failure.failed_in, BuildState::Executing);
    assert_eq!(failure.steps.len(), 2);
    assert_eq!(fx.store.list().unwrap().len(), 2);

    std::fs::write(&marker, "").unwrap();
    let retried = build(&orchestrator, &fx.plan(drafts())).await;
    assert_eq!(retried.statuses(), vec![Hit, Hit, Miss, Miss]);

    let fresh = Fixture::new();
    let uninterrupted = build(&fresh.orchestrator(), &fresh.plan(drafts())).await;
    assert_eq!(retried.artifact, uninterrupted.artifact);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn concurrent_builds_share_prefix() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let plan_for = |name: &str| {
      fx.plan(vec![
        StepDraft::base_image("scratch"),
        StepDraft::dependencies(write_file_cmd("deps", "shared")),
        StepDraft::system_packages(write_file_cmd(name, name)),
      ])
    };
    let (a, b) = (plan_for("a"), plan_for("b"));

    let (ra, rb) = tokio::join!(
      {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.build(&a, &CancelHandle::new()).await }
      },
      {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.build(&b, &CancelHandle::new()).await }
      }
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.steps[..2].iter().map(|s| s.fingerprint).collect::<Vec<_>>(), rb.steps[..2].iter().map(|s| s.fingerprint).collect::<Vec<_>>());
    // the shared prefix is produced exactly once
    assert_eq!(ra.misses() + rb.misses(), 4);
    assert_eq!(ra.hits() + rb.hits(), 2);

    let fingerprints: BTreeSet<_> = fx.store.list().unwrap().into_iter().map(|e| e.fingerprint).collect();
    assert_eq!(fingerprints.len(), 4);
    assert!(fingerprints.contains(&ra.artifact.fingerprint));
    assert!(fingerprints.contains(&rb.artifact.fingerprint));
  }

  #[tokio::test]
  async fn cancelled_before_start_touches_nothing() {
    let fx = Fixture::new();
    let cancel = CancelHandle::new();
    cancel.cancel();

    let failure = fx.orchestrator().build(&fx.python_plan(), &cancel).await.unwrap_err();
    assert!(matches!(failure.error, BuildError::Cancelled { step: 0 }));
    assert_eq!(failure.failed_in, BuildState::Probing);
    assert!(fx.store.list().unwrap().is_empty());
  }

  /// Writes a file and cancels the build it is running in.
  struct CancelDuringInstall(CancelHandle);

  #[async_trait]
  impl PackageManager for CancelDuringInstall {
    async fn install(&self, request: InstallRequest<'_>) -> Result<BTreeSet<String>, ActionError> {
      std::fs::write(request.workdir.join("partial"), "x").map_err(ActionError::io("write", request.workdir))?;
      self.0.cancel();
      Ok(["partial".to_string()].into())
    }
  }

  #[tokio::test]
  async fn cancellation_discards_uncommitted_step() {
    let fx = Fixture::new();
    let cancel = CancelHandle::new();
    let executor = Executor::builder().package_manager(CancelDuringInstall(cancel.clone())).build();
    let orchestrator = Orchestrator::new(fx.store.clone(), executor);
    let plan = fx.plan(vec![
      StepDraft::base_image("scratch"),
      StepDraft::file_copy(["src"], "/app/"),
      StepDraft::dependencies(["pip", "install"]),
    ]);

    let failure = orchestrator.build(&plan, &cancel).await.unwrap_err();
    assert!(matches!(failure.error, BuildError::Cancelled { step: 2 }));
    assert_eq!(failure.steps.len(), 2);
    assert!(fx.store.contains(&plan.steps()[1].fingerprint).unwrap());
    assert!(!fx.store.contains(&plan.steps()[2].fingerprint).unwrap());
  }

  /// Runs an aggressive eviction against the store while its step executes.
  struct EvictDuringInstall {
    store: CacheStore,
    stats: std::sync::Mutex<Option<EvictStats>>,
  }

  #[async_trait]
  impl PackageManager for EvictDuringInstall {
    async fn install(&self, request: InstallRequest<'_>) -> Result<BTreeSet<String>, ActionError> {
      let stats = self
        .store
        .evict(&EvictPolicy {
          max_entries: Some(0),
          ..Default::default()
        })
        .map_err(ActionError::CacheStore)?;
      *self.stats.lock().unwrap() = Some(stats);
      std::fs::write(request.workdir.join("deps"), "x").map_err(ActionError::io("write", request.workdir))?;
      Ok(["deps".to_string()].into())
    }
  }

  #[tokio::test]
  async fn eviction_during_build_keeps_committed_steps() {
    let fx = Fixture::new();
    let manager = Arc::new(EvictDuringInstall {
      store: fx.store.clone(),
      stats: std::sync::Mutex::new(None),
    });
    let executor = Executor::builder()
      .action(StepKind::DependencyInstall, InstallAction::new(manager.clone()))
      .build();
    let orchestrator = Orchestrator::new(fx.store.clone(), executor);
    let plan = fx.plan(vec![
      StepDraft::base_image("scratch"),
      StepDraft::file_copy(["src"], "/app/"),
      StepDraft::dependencies(["pip", "install"]),
    ]);

    let result = build(&orchestrator, &plan).await;
    assert_eq!(result.statuses(), vec![Miss, Miss, Miss]);

    let stats = manager.stats.lock().unwrap().clone().unwrap();
    assert_eq!(stats.scanned, 2);
    assert_eq!(stats.evicted, 0);
    assert_eq!(stats.skipped_in_use, 2);

    for step in plan.steps() {
      assert!(fx.store.contains(&step.fingerprint).unwrap());
    }
    let dest = TempDir::new().unwrap();
    fx.store.export(&result.artifact, dest.path()).unwrap();
    assert_eq!(read(dest.path(), "app/main.py"), "src-v1");
    assert_eq!(read(dest.path(), "deps"), "x");

    // once the build is over nothing is pinned
    let after = fx
      .store
      .evict(&EvictPolicy {
        max_entries: Some(0),
        ..Default::default()
      })
      .unwrap();
    assert_eq!(after.evicted, 3);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn install_command_reads_declared_files() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let plan = fx.plan(vec![
      StepDraft::base_image("scratch"),
      StepDraft::dependencies(crate::util::testutil::shell_cmd("cat requirements.txt > installed")).with_file("requirements.txt"),
    ]);

    let result = build(&orchestrator, &plan).await;
    assert!(result.artifact.files.contains_key("requirements.txt"));

    let dest = TempDir::new().unwrap();
    fx.store.export(&result.artifact, dest.path()).unwrap();
    assert_eq!(read(dest.path(), "installed"), "reqs-v1");
    assert_eq!(read(dest.path(), "requirements.txt"), "reqs-v1");
  }

  #[tokio::test]
  async fn timeout_fails_the_build() {
    let fx = Fixture::new();
    let executor = Executor::new(ExecuteConfig {
      timeout: Duration::from_millis(200),
      ..Default::default()
    });
    let orchestrator = Orchestrator::new(fx.store.clone(), executor);
    let plan = fx.plan(vec![StepDraft::base_image("scratch"), StepDraft::system_packages(sleep_cmd(10))]);

    let failure = orchestrator.build(&plan, &CancelHandle::new()).await.unwrap_err();
    match &failure.error {
      BuildError::Execution(e) => assert!(e.is_timeout(), "got {e}"),
      other => panic!("expected timeout, got {other}"),
    }
    assert_eq!(failure.steps.len(), 1);
    assert!(fx.store.contains(&plan.steps()[0].fingerprint).unwrap());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn store_failure_is_reported_against_the_step() {
    let fx = Fixture::new();
    let entries = fx.store.root().join("entries");
    std::fs::remove_dir_all(&entries).unwrap();
    std::fs::write(&entries, "not a directory").unwrap();

    let failure = fx.orchestrator().build(&fx.python_plan(), &CancelHandle::new()).await.unwrap_err();
    let BuildError::Execution(cause) = failure.error else {
      panic!("expected execution failure");
    };
    assert_eq!(cause.step, 0);
    assert!(matches!(cause.cause, ActionError::CacheStore(_)));
    assert_eq!(failure.failed_in, BuildState::Probing);
  }

  #[tokio::test]
  async fn planning_errors_fail_before_probing() {
    let fx = Fixture::new();
    let descriptor = BuildDescriptor::from_yaml_str(
      "steps:\n  - kind: base-image\n    image: scratch\n  - kind: dependency-install\n    run: pip install\n    files: [missing.txt]\n",
    )
    .unwrap();

    let failure = fx
      .orchestrator()
      .build_descriptor(&descriptor, fx.ctx.path(), &CancelHandle::new())
      .await
      .unwrap_err();
    assert!(matches!(failure.error, BuildError::Plan(PlanError::InputUnreadable { .. })));
    assert_eq!(failure.failed_in, BuildState::Planning);
    assert!(fx.store.list().unwrap().is_empty());
  }

  #[tokio::test]
  async fn probe_reports_reusable_prefix() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    build(&orchestrator, &fx.python_plan()).await;

    write_tree(fx.ctx.path(), &[("requirements.txt", "reqs-v2")]);
    let probe = orchestrator.probe(&fx.python_plan()).unwrap();
    assert_eq!(probe.iter().map(|r| r.reusable).collect::<Vec<_>>(), vec![true, false, false]);
    assert!(probe.iter().skip(1).all(|r| !r.cached));
  }

  #[tokio::test]
  async fn entrypoint_only_change_reuses_filesystem_layers() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    let with_entry = |cmd: &str| {
      fx.plan(vec![
        StepDraft::base_image("scratch"),
        StepDraft::file_copy(["src"], "/app/"),
        StepDraft::entrypoint([cmd]),
      ])
    };

    build(&orchestrator, &with_entry("a")).await;
    let result = build(&orchestrator, &with_entry("b")).await;
    assert_eq!(result.statuses(), vec![Hit, Hit, Miss]);
    assert_eq!(result.artifact.entrypoint.unwrap().command, vec!["b"]);
    assert!(matches!(result.artifact.files["app/main.py"], FsEntry::File { .. }));
  }

  #[traced_test]
  #[tokio::test]
  async fn logs_build_summary() {
    let fx = Fixture::new();
    build(&fx.orchestrator(), &fx.python_plan()).await;
    assert!(logs_contain("build succeeded"));
    assert!(logs_contain("committed artifact"));
  }
}
