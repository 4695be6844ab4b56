use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, InputDescriptor, chain, content_hash, resolve_input};
use crate::util::hash::ContentHash;

use super::PlanError;

/// The closed set of step kinds the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
  BaseImage,
  SystemPackageInstall,
  DependencyInstall,
  FileCopy,
  EntrypointConfig,
}

impl StepKind {
  pub const ALL: [StepKind; 5] = [
    StepKind::BaseImage,
    StepKind::SystemPackageInstall,
    StepKind::DependencyInstall,
    StepKind::FileCopy,
    StepKind::EntrypointConfig,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      StepKind::BaseImage => "base-image",
      StepKind::SystemPackageInstall => "system-package-install",
      StepKind::DependencyInstall => "dependency-install",
      StepKind::FileCopy => "file-copy",
      StepKind::EntrypointConfig => "entrypoint-config",
    }
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown step kind '{0}'")]
pub struct ParseStepKindError(pub String);

impl FromStr for StepKind {
  type Err = ParseStepKindError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    StepKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| ParseStepKindError(s.to_string()))
  }
}

/// Parameters for the two install kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSpec {
  /// argv of the package-manager invocation.
  pub command: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

/// Parameters for `file-copy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
  /// Paths relative to the build context, copied in order.
  pub sources: Vec<PathBuf>,
  /// Destination inside the artifact filesystem. A trailing `/`, several
  /// sources or a directory source all mean "copy into this directory".
  pub destination: String,
}

/// Parameters for `entrypoint-config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointSpec {
  pub command: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workdir: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

/// Action-specific parameters of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepParams {
  BaseImage { image: String },
  Install(InstallSpec),
  FileCopy(CopySpec),
  Entrypoint(EntrypointSpec),
}

/// A declared input before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
  Literal(String),
  /// File or directory relative to the build context.
  Path(PathBuf),
}

/// An unresolved step: kind, parameters and any extra declared files.
///
/// The literal inputs that make up most of a step's identity are derived from
/// its parameters, so two drafts with the same parameters always fingerprint
/// the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDraft {
  pub kind: StepKind,
  pub params: StepParams,
  pub files: Vec<PathBuf>,
}

impl StepDraft {
  pub fn base_image(image: impl Into<String>) -> Self {
    Self {
      kind: StepKind::BaseImage,
      params: StepParams::BaseImage { image: image.into() },
      files: Vec::new(),
    }
  }

  pub fn system_packages<I, S>(command: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::install(StepKind::SystemPackageInstall, command)
  }

  pub fn dependencies<I, S>(command: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::install(StepKind::DependencyInstall, command)
  }

  fn install<I, S>(kind: StepKind, command: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      kind,
      params: StepParams::Install(InstallSpec {
        command: command.into_iter().map(Into::into).collect(),
        env: BTreeMap::new(),
      }),
      files: Vec::new(),
    }
  }

  pub fn file_copy<I, P>(sources: I, destination: impl Into<String>) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    Self {
      kind: StepKind::FileCopy,
      params: StepParams::FileCopy(CopySpec {
        sources: sources.into_iter().map(Into::into).collect(),
        destination: destination.into(),
      }),
      files: Vec::new(),
    }
  }

  pub fn entrypoint<I, S>(command: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      kind: StepKind::EntrypointConfig,
      params: StepParams::Entrypoint(EntrypointSpec {
        command: command.into_iter().map(Into::into).collect(),
        workdir: None,
        env: BTreeMap::new(),
      }),
      files: Vec::new(),
    }
  }

  /// Declare a context file whose content the step depends on (e.g. a lockfile).
  pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.files.push(path.into());
    self
  }

  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    match &mut self.params {
      StepParams::Install(spec) => {
        spec.env.insert(key.into(), value.into());
      }
      StepParams::Entrypoint(spec) => {
        spec.env.insert(key.into(), value.into());
      }
      StepParams::BaseImage { .. } | StepParams::FileCopy(_) => {}
    }
    self
  }

  pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
    if let StepParams::Entrypoint(spec) = &mut self.params {
      spec.workdir = Some(workdir.into());
    }
    self
  }

  /// Declared inputs in order: parameter literals first, then paths.
  pub fn declared_inputs(&self) -> Vec<InputSpec> {
    let mut inputs = Vec::new();
    match &self.params {
      StepParams::BaseImage { image } => inputs.push(InputSpec::Literal(format!("image={}", image))),
      StepParams::Install(spec) => {
        inputs.extend(spec.command.iter().map(|arg| InputSpec::Literal(format!("arg={}", arg))));
        inputs.extend(spec.env.iter().map(|(k, v)| InputSpec::Literal(format!("env={}={}", k, v))));
      }
      StepParams::FileCopy(spec) => {
        inputs.push(InputSpec::Literal(format!("dest={}", spec.destination)));
        inputs.extend(spec.sources.iter().cloned().map(InputSpec::Path));
      }
      StepParams::Entrypoint(spec) => {
        inputs.extend(spec.command.iter().map(|arg| InputSpec::Literal(format!("arg={}", arg))));
        if let Some(workdir) = &spec.workdir {
          inputs.push(InputSpec::Literal(format!("workdir={}", workdir)));
        }
        inputs.extend(spec.env.iter().map(|(k, v)| InputSpec::Literal(format!("env={}={}", k, v))));
      }
    }
    inputs.extend(self.files.iter().cloned().map(InputSpec::Path));
    inputs
  }

  fn validate(&self, index: usize) -> Result<(), PlanError> {
    let invalid = |message: &str| PlanError::InvalidStep {
      index,
      message: message.to_string(),
    };

    match (&self.kind, &self.params) {
      (StepKind::BaseImage, StepParams::BaseImage { image }) => {
        if image.trim().is_empty() {
          return Err(invalid("base-image requires a non-empty image identifier"));
        }
      }
      (StepKind::SystemPackageInstall | StepKind::DependencyInstall, StepParams::Install(spec)) => {
        if spec.command.is_empty() {
          return Err(invalid("install steps require a command"));
        }
      }
      (StepKind::FileCopy, StepParams::FileCopy(spec)) => {
        if spec.sources.is_empty() {
          return Err(invalid("file-copy requires at least one source"));
        }
        if !is_contained(Path::new(&spec.destination)) {
          return Err(invalid("file-copy destination must not escape the artifact root"));
        }
        if spec.sources.iter().any(|s| s.is_absolute() || !is_contained(s)) {
          return Err(invalid("file-copy sources must be relative to the build context"));
        }
      }
      (StepKind::EntrypointConfig, StepParams::Entrypoint(spec)) => {
        if spec.command.is_empty() {
          return Err(invalid("entrypoint-config requires a command"));
        }
      }
      (kind, _) => {
        return Err(PlanError::InvalidStep {
          index,
          message: format!("parameters do not match step kind {}", kind),
        });
      }
    }

    if self.files.iter().any(|f| f.is_absolute() || !is_contained(f)) {
      return Err(invalid("declared files must be relative to the build context"));
    }

    Ok(())
  }
}

/// True when `path` has no `..` component.
fn is_contained(path: &Path) -> bool {
  !path.components().any(|c| matches!(c, Component::ParentDir))
}

/// One planned step with its resolved inputs and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStep {
  pub index: usize,
  pub kind: StepKind,
  pub params: StepParams,
  pub inputs: Vec<InputDescriptor>,
  pub content: ContentHash,
  pub parent: Option<Fingerprint>,
  pub fingerprint: Fingerprint,
}

/// An ordered, non-empty chain of steps whose first step is `base-image`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
  context_dir: PathBuf,
  steps: Vec<BuildStep>,
}

impl BuildPlan {
  /// Validate drafts, resolve their inputs and compute every fingerprint.
  pub fn from_drafts(context_dir: impl Into<PathBuf>, drafts: Vec<StepDraft>) -> Result<Self, PlanError> {
    let context_dir = context_dir.into();

    let Some(first) = drafts.first() else {
      return Err(PlanError::EmptyPlan);
    };
    if first.kind != StepKind::BaseImage {
      return Err(PlanError::MissingBase { kind: first.kind });
    }

    for (index, draft) in drafts.iter().enumerate() {
      if index > 0 && draft.kind == StepKind::BaseImage {
        return Err(PlanError::MisplacedBase { index });
      }
      draft.validate(index)?;
    }

    let mut steps: Vec<BuildStep> = Vec::with_capacity(drafts.len());
    for (index, draft) in drafts.into_iter().enumerate() {
      let inputs = draft
        .declared_inputs()
        .iter()
        .map(|spec| resolve_input(&context_dir, spec))
        .collect::<Result<Vec<_>, _>>()?;
      let content = content_hash(draft.kind, &inputs);
      let parent = steps.last().map(|s| s.fingerprint);
      let fingerprint = chain(parent.as_ref(), &content);

      steps.push(BuildStep {
        index,
        kind: draft.kind,
        params: draft.params,
        inputs,
        content,
        parent,
        fingerprint,
      });
    }

    Ok(Self { context_dir, steps })
  }

  pub fn context_dir(&self) -> &Path {
    &self.context_dir
  }

  pub fn steps(&self) -> &[BuildStep] {
    &self.steps
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  /// Always false; plans are validated non-empty.
  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn final_fingerprint(&self) -> Fingerprint {
    // non-empty by construction
    self.steps[self.steps.len() - 1].fingerprint
  }
}
