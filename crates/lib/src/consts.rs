//! Crate-wide constants.

pub const APP_NAME: &str = "layercake";

/// Environment variable overriding the cache store location.
pub const STORE_ENV: &str = "LAYERCAKE_STORE";

/// Marker written last into a staged entry; its presence means the entry is complete.
pub const ENTRY_COMPLETE_MARKER: &str = ".layercake-complete";

/// Artifact manifest file inside a store entry.
pub const ARTIFACT_MANIFEST: &str = "artifact.json";

/// Directory holding the filesystem delta inside a store entry.
pub const LAYER_DIR: &str = "layer";

/// Domain separator mixed into every step fingerprint.
pub const FINGERPRINT_DOMAIN: &[u8] = b"layercake-step-v1";

/// Version written into entry markers and manifests.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// `SOURCE_DATE_EPOCH` handed to install commands (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
