//! Release composition: the post-build hook itself.
//!
//! [`run_hook`] resolves the version once, scans the build directory, then
//! runs the OTA path and the setup path independently. Every failure ends in
//! the returned [`HookReport`]; nothing is propagated to the host build.

use crate::artifacts::{output_path, ArtifactKind, BuildArtifactSet, OutputArtifact};
use crate::config::BuildConfig;
use crate::manifest::ReleaseManifest;
use crate::merge::{CommandRunner, ImageMerger, MergeError};
use crate::report::{AppOutcome, HookReport, ManifestOutcome, SetupState};
use crate::version::{resolve_version, FirmwareVersion};
use log::{debug, error, info, warn};
use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Decides which release images can be produced and produces them.
pub struct ArtifactComposer<'a, R: CommandRunner> {
    config: &'a BuildConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner> ArtifactComposer<'a, R> {
    /// Create a composer for one build.
    pub fn new(config: &'a BuildConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    /// Copy the application image to `app-firmware-{version}.bin`.
    ///
    /// Needs only the application image. Silently skipped if it is absent,
    /// since the build that should have produced it already failed.
    pub fn produce_ota(
        &self,
        version: &FirmwareVersion,
        artifacts: &BuildArtifactSet,
    ) -> AppOutcome {
        if !artifacts.application.exists {
            debug!(
                "No application image at {}",
                artifacts.application.path.display()
            );
            return AppOutcome::Skipped;
        }

        let dest = output_path(
            &self.config.build_dir,
            ArtifactKind::AppImage,
            version,
            self.config.setup_naming,
        );

        match copy_preserving_mtime(&artifacts.application.path, &dest) {
            Ok(size) => {
                info!("OTA firmware created: {} ({} bytes)", dest.display(), size);
                AppOutcome::Produced(OutputArtifact {
                    kind: ArtifactKind::AppImage,
                    path: dest,
                    size,
                })
            }
            Err(e) => {
                error!("Error creating OTA firmware {}: {}", dest.display(), e);
                AppOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Merge bootloader, partition table and application into the setup image.
    ///
    /// The merge tool is only invoked when all three inputs exist.
    pub fn produce_setup(
        &self,
        version: &FirmwareVersion,
        artifacts: &BuildArtifactSet,
    ) -> SetupState {
        let mut state = SetupState::NotStarted;
        advance(&mut state, SetupState::Validating);

        let Some(inputs) = artifacts.complete() else {
            warn!("Not all firmware files exist, skipping merge");
            let missing = artifacts.missing();
            for path in &missing {
                debug!("Missing: {}", path.display());
            }
            advance(&mut state, SetupState::Skipped { missing });
            return state;
        };

        advance(&mut state, SetupState::Merging);
        let Some(tool) = self.config.merge_tool.as_ref() else {
            let err = MergeError::ToolNotFound;
            error!("Error creating merged firmware: {}", err);
            advance(
                &mut state,
                SetupState::Failed {
                    diagnostic: err.to_string(),
                },
            );
            return state;
        };

        let output = output_path(
            &self.config.build_dir,
            ArtifactKind::SetupImage,
            version,
            self.config.setup_naming,
        );

        let merger = ImageMerger::new(self.runner, self.config.merge_timeout);
        match merger.merge(tool, &inputs, &output) {
            Ok(artifact) => {
                info!("Merged firmware created: {} bytes", artifact.size);
                advance(&mut state, SetupState::Succeeded(artifact));
            }
            Err(e) => {
                error!("Error creating merged firmware: {}", e);
                advance(
                    &mut state,
                    SetupState::Failed {
                        diagnostic: e.to_string(),
                    },
                );
            }
        }
        state
    }

    /// Write the release manifest if enabled.
    pub fn write_manifest(
        &self,
        version: &FirmwareVersion,
        produced: &[&OutputArtifact],
    ) -> ManifestOutcome {
        if !self.config.write_manifest {
            return ManifestOutcome::Disabled;
        }
        match ReleaseManifest::build(version, produced)
            .and_then(|m| m.write_to(&self.config.build_dir))
        {
            Ok(path) => ManifestOutcome::Written(path),
            Err(e) => {
                warn!("Release manifest not written: {}", e);
                ManifestOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn advance(state: &mut SetupState, next: SetupState) {
    debug_assert!(
        state.can_advance_to(&next),
        "illegal setup transition {:?} -> {:?}",
        state,
        next
    );
    debug!("Setup image: {:?} -> {:?}", state, next);
    *state = next;
}

/// Copy `src` to `dst`, keeping the source modification time.
///
/// Returns the size of the copy. The copy takes the source's permission
/// bits, so a previous read-only copy is removed before writing and the
/// timestamp is set through a read-only handle.
pub fn copy_preserving_mtime(src: &Path, dst: &Path) -> io::Result<u64> {
    let modified = fs::metadata(src)?.modified()?;
    match fs::remove_file(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::copy(src, dst)?;
    let file = File::open(dst)?;
    file.set_modified(modified)?;
    Ok(file.metadata()?.len())
}

/// Run the complete post-build hook for one build.
pub fn run_hook<R: CommandRunner>(config: &BuildConfig, runner: &R) -> HookReport {
    let version = resolve_version(&config.version_file, &config.version_macro);
    info!("Firmware version: {}", version);

    let artifacts = BuildArtifactSet::scan(&config.build_dir);
    let composer = ArtifactComposer::new(config, runner);

    let app = composer.produce_ota(&version, &artifacts);
    let setup = composer.produce_setup(&version, &artifacts);

    let mut report = HookReport {
        version,
        app,
        setup,
        manifest: ManifestOutcome::Disabled,
    };
    let manifest = composer.write_manifest(&report.version, &report.produced());
    report.manifest = manifest;
    report
}
