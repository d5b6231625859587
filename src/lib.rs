//! ESP32 firmware release packaging.
//!
//! Runs after the firmware build and turns its output directory into
//! distributable images: a versioned OTA image and a merged setup image
//! for first-time flashing.

pub mod artifacts;
pub mod compose;
pub mod config;
pub mod host_utils;
pub mod manifest;
pub mod merge;
pub mod report;
pub mod version;

#[cfg(test)]
mod testutil;

// Re-export commonly used items
pub use artifacts::{ArtifactKind, BuildArtifactSet, OutputArtifact};
pub use compose::{run_hook, ArtifactComposer};
pub use config::{BuildConfig, ConfigError, MergeTool, SetupNaming};
pub use merge::{CommandRunner, ImageMerger, MergeCommand, MergeError, ProcessRunner};
pub use report::{AppOutcome, HookReport, ManifestOutcome, SetupState};
pub use version::{resolve_version, FirmwareVersion};
