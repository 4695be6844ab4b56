//! Step fingerprints.
//!
//! A step's fingerprint identifies its cumulative history:
//!
//! ```text
//! fp(step0) = H(domain ‖ 0x00 ‖ content(step0))
//! fp(stepN) = H(domain ‖ 0x01 ‖ fp(stepN-1) ‖ content(stepN))
//! ```
//!
//! where `content` hashes the step kind and its declared inputs in declaration
//! order. Changing any step therefore changes its fingerprint and every one
//! after it, and never the ones before it.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::consts::FINGERPRINT_DOMAIN;
use crate::plan::{InputSpec, PlanError, StepKind};
use crate::util::hash::{ContentHash, hash_directory, hash_file, relative_key};

/// A fixed-size SHA-256 digest identifying a step and everything before it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

#[derive(Debug, thiserror::Error)]
#[error("invalid fingerprint '{0}': expected 64 hex characters")]
pub struct ParseFingerprintError(pub String);

impl Fingerprint {
  pub fn from_bytes(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }

  /// First 12 hex characters, for display.
  pub fn short(&self) -> String {
    hex::encode(&self.0[..6])
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl fmt::Debug for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Fingerprint({})", self.short())
  }
}

impl FromStr for Fingerprint {
  type Err = ParseFingerprintError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseFingerprintError(s.to_string()))?;
    Ok(Self(bytes))
  }
}

impl Serialize for Fingerprint {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for Fingerprint {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// A declared input after resolution: literals verbatim, paths by content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InputDescriptor {
  Literal { value: String },
  Path { path: String, digest: ContentHash },
}

/// Resolve a declared input against the build context.
///
/// Files are hashed by content and directories with [`hash_directory`], so
/// modification times never influence the result.
pub fn resolve_input(context_dir: &Path, spec: &InputSpec) -> Result<InputDescriptor, PlanError> {
  match spec {
    InputSpec::Literal(value) => Ok(InputDescriptor::Literal { value: value.clone() }),
    InputSpec::Path(path) => {
      let full = context_dir.join(path);
      let unreadable = |message: String| PlanError::InputUnreadable {
        path: full.clone(),
        message,
      };

      let meta = std::fs::metadata(&full).map_err(|e| unreadable(e.to_string()))?;
      let digest = if meta.is_dir() {
        hash_directory(&full, &[]).map_err(|e| unreadable(e.to_string()))?
      } else {
        hash_file(&full).map_err(|e| unreadable(e.to_string()))?
      };

      Ok(InputDescriptor::Path {
        path: relative_key(Path::new(""), path),
        digest,
      })
    }
  }
}

fn frame(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
  hasher.update([tag]);
  hasher.update((bytes.len() as u64).to_le_bytes());
  hasher.update(bytes);
}

/// Hash a step's kind and declared inputs, in declaration order.
pub fn content_hash(kind: StepKind, inputs: &[InputDescriptor]) -> ContentHash {
  let mut hasher = Sha256::new();
  frame(&mut hasher, b'K', kind.as_str().as_bytes());
  for input in inputs {
    match input {
      InputDescriptor::Literal { value } => frame(&mut hasher, b'L', value.as_bytes()),
      InputDescriptor::Path { path, digest } => {
        frame(&mut hasher, b'P', path.as_bytes());
        frame(&mut hasher, b'D', digest.as_str().as_bytes());
      }
    }
  }
  ContentHash(hex::encode(hasher.finalize()))
}

/// Chain a step's content hash onto its predecessor's fingerprint.
pub fn chain(previous: Option<&Fingerprint>, content: &ContentHash) -> Fingerprint {
  let mut hasher = Sha256::new();
  hasher.update(FINGERPRINT_DOMAIN);
  match previous {
    None => hasher.update([0u8]),
    Some(prev) => {
      hasher.update([1u8]);
      hasher.update(prev.as_bytes());
    }
  }
  hasher.update(content.as_str().as_bytes());
  Fingerprint(hasher.finalize().into())
}
