//! Build descriptors: the declarative input to the planner.
//!
//! A descriptor is a JSON or YAML document listing steps in order:
//!
//! ```yaml
//! steps:
//!   - kind: base-image
//!     image: python:3.12-slim
//!   - kind: system-package-install
//!     run: apt-get install -y --no-install-recommends build-essential
//!   - kind: dependency-install
//!     run: pip install -r requirements.txt
//!     files: [requirements.txt]
//!   - kind: file-copy
//!     sources: [src]
//!     destination: /app/
//!   - kind: entrypoint-config
//!     command: [python, /app/main.py]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::types::{CopySpec, EntrypointSpec, InstallSpec, StepDraft, StepKind, StepParams};
use super::PlanError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
  #[serde(default)]
  pub steps: Vec<StepSpec>,
}

/// One step as written in a descriptor. `kind` stays a string so unknown
/// kinds surface as a planning error with the step index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
  pub kind: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  /// Shell command line, run through the platform shell.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run: Option<String>,
  /// argv form; used verbatim.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub command: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub files: Vec<PathBuf>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sources: Vec<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub destination: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workdir: Option<String>,
}

impl BuildDescriptor {
  /// Load a descriptor, picking the format from the file extension
  /// (`.json` is JSON, anything else YAML).
  pub fn load(path: &Path) -> Result<Self, PlanError> {
    let content = std::fs::read_to_string(path).map_err(|source| PlanError::ReadDescriptor {
      path: path.to_path_buf(),
      source,
    })?;

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let parsed = if is_json {
      Self::from_json_str(&content)
    } else {
      Self::from_yaml_str(&content)
    };

    parsed.map_err(|message| PlanError::ParseDescriptor {
      path: path.to_path_buf(),
      message,
    })
  }

  pub fn from_json_str(content: &str) -> Result<Self, String> {
    serde_json::from_str(content).map_err(|e| e.to_string())
  }

  pub fn from_yaml_str(content: &str) -> Result<Self, String> {
    serde_yaml::from_str(content).map_err(|e| e.to_string())
  }

  /// Translate every step into a draft, in order.
  pub fn drafts(&self) -> Result<Vec<StepDraft>, PlanError> {
    self
      .steps
      .iter()
      .enumerate()
      .map(|(index, spec)| spec.to_draft(index))
      .collect()
  }
}

impl StepSpec {
  fn to_draft(&self, index: usize) -> Result<StepDraft, PlanError> {
    let kind: StepKind = self.kind.parse().map_err(|_| PlanError::UnknownStepKind {
      index,
      kind: self.kind.clone(),
    })?;

    let missing = |field: &str| PlanError::InvalidStep {
      index,
      message: format!("{} requires '{}'", kind, field),
    };

    let params = match kind {
      StepKind::BaseImage => StepParams::BaseImage {
        image: self.image.clone().ok_or_else(|| missing("image"))?,
      },
      StepKind::SystemPackageInstall | StepKind::DependencyInstall => StepParams::Install(InstallSpec {
        command: self.argv(index)?.ok_or_else(|| missing("run' or 'command"))?,
        env: self.env.clone(),
      }),
      StepKind::FileCopy => StepParams::FileCopy(CopySpec {
        sources: self.sources.clone(),
        destination: self.destination.clone().ok_or_else(|| missing("destination"))?,
      }),
      StepKind::EntrypointConfig => StepParams::Entrypoint(EntrypointSpec {
        command: self.argv(index)?.ok_or_else(|| missing("command"))?,
        workdir: self.workdir.clone(),
        env: self.env.clone(),
      }),
    };

    Ok(StepDraft {
      kind,
      params,
      files: self.files.clone(),
    })
  }

  fn argv(&self, index: usize) -> Result<Option<Vec<String>>, PlanError> {
    match (&self.run, &self.command) {
      (Some(_), Some(_)) => Err(PlanError::InvalidStep {
        index,
        message: "'run' and 'command' are mutually exclusive".to_string(),
      }),
      (Some(run), None) => Ok(Some(shell_command(run))),
      (None, Some(command)) => Ok(Some(command.clone())),
      (None, None) => Ok(None),
    }
  }
}

/// Wrap a command line for the platform shell.
#[cfg(unix)]
pub fn shell_command(run: &str) -> Vec<String> {
  vec!["/bin/sh".to_string(), "-c".to_string(), run.to_string()]
}

#[cfg(windows)]
pub fn shell_command(run: &str) -> Vec<String> {
  vec!["cmd.exe".to_string(), "/C".to_string(), run.to_string()]
}
