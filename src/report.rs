//! Hook outcome and its textual report.

use crate::artifacts::OutputArtifact;
use crate::version::FirmwareVersion;
use std::fmt;
use std::path::{Path, PathBuf};

/// Result of the OTA path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppOutcome {
    /// The application image was copied.
    Produced(OutputArtifact),
    /// No application image to copy.
    Skipped,
    /// The copy failed.
    Failed {
        /// Underlying error.
        reason: String,
    },
}

/// Progress of the setup path.
///
/// `NotStarted → Validating → {Skipped | Merging} → {Succeeded | Failed}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupState {
    /// Nothing done yet.
    NotStarted,
    /// Checking prerequisites.
    Validating,
    /// Prerequisites missing, merge not attempted.
    Skipped {
        /// Prerequisites that were absent.
        missing: Vec<PathBuf>,
    },
    /// Merge started: locating and running the merge tool.
    Merging,
    /// Setup image written.
    Succeeded(OutputArtifact),
    /// Merge attempted and failed.
    Failed {
        /// Error message, including captured tool output.
        diagnostic: String,
    },
}

impl SetupState {
    /// True for `Skipped`, `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped { .. } | Self::Succeeded(_) | Self::Failed { .. }
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(&self, next: &SetupState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Validating)
                | (Self::Validating, Self::Skipped { .. })
                | (Self::Validating, Self::Merging)
                | (Self::Merging, Self::Succeeded(_))
                | (Self::Merging, Self::Failed { .. })
        )
    }

    fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Validating => "validating",
            Self::Skipped { .. } => "skipped",
            Self::Merging => "merging",
            Self::Succeeded(_) => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Result of the release manifest step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    /// Manifest not requested.
    Disabled,
    /// Manifest written.
    Written(PathBuf),
    /// Writing the manifest failed.
    Failed {
        /// Underlying error.
        reason: String,
    },
}

/// Everything one hook invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    /// Version the outputs were named with.
    pub version: FirmwareVersion,
    /// OTA path result.
    pub app: AppOutcome,
    /// Setup path final state.
    pub setup: SetupState,
    /// Manifest result.
    pub manifest: ManifestOutcome,
}

impl HookReport {
    /// Artifacts written by this invocation.
    pub fn produced(&self) -> Vec<&OutputArtifact> {
        let mut out = Vec::new();
        if let AppOutcome::Produced(a) = &self.app {
            out.push(a);
        }
        if let SetupState::Succeeded(a) = &self.setup {
            out.push(a);
        }
        out
    }
}

impl fmt::Display for HookReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Firmware version: {}", self.version)?;

        match &self.app {
            AppOutcome::Produced(a) => writeln!(
                f,
                "OTA firmware created: {} ({} bytes)",
                file_name(&a.path),
                format_thousands(a.size)
            )?,
            AppOutcome::Skipped => writeln!(f, "OTA firmware: skipped, no application image")?,
            AppOutcome::Failed { reason } => {
                writeln!(f, "Error creating OTA firmware: {}", reason)?
            }
        }

        match &self.setup {
            SetupState::Succeeded(a) => writeln!(
                f,
                "Merged firmware created: {} ({} bytes)",
                file_name(&a.path),
                format_thousands(a.size)
            )?,
            SetupState::Skipped { missing } => {
                let names: Vec<_> = missing.iter().map(|p| file_name(p)).collect();
                writeln!(
                    f,
                    "Warning: Not all firmware files exist, skipping merge (missing: {})",
                    names.join(", ")
                )?
            }
            SetupState::Failed { diagnostic } => {
                writeln!(f, "Error creating merged firmware: {}", diagnostic)?
            }
            state => writeln!(f, "Merged firmware: {}", state.name())?,
        }

        match &self.manifest {
            ManifestOutcome::Disabled => {}
            ManifestOutcome::Written(path) => {
                writeln!(f, "Release manifest: {}", file_name(path))?
            }
            ManifestOutcome::Failed { reason } => {
                writeln!(f, "Warning: release manifest not written: {}", reason)?
            }
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Format a byte count with comma thousands separators (`1234567` → `1,234,567`).
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
