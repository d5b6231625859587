//! Build artifacts consumed and produced by the release hook.
//!
//! Inputs are the three binaries the host build leaves in its output
//! directory. Outputs are named purely from (kind, version), so two calls
//! with the same inputs always agree on file names.

use crate::config::SetupNaming;
use crate::version::FirmwareVersion;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Second-stage bootloader image.
pub const BOOTLOADER_BIN: &str = "bootloader.bin";

/// Partition table image.
pub const PARTITIONS_BIN: &str = "partitions.bin";

/// Application image.
pub const APPLICATION_BIN: &str = "firmware.bin";

/// Setup image name under [`SetupNaming::Unversioned`].
pub const UNVERSIONED_SETUP_NAME: &str = "merged-flash.bin";

/// File extension of every produced image.
pub const IMAGE_EXTENSION: &str = "bin";

/// One prerequisite binary and whether it was present when scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisite {
    /// Location in the build directory.
    pub path: PathBuf,
    /// Whether the file existed at scan time.
    pub exists: bool,
}

impl Prerequisite {
    fn scan(path: PathBuf) -> Self {
        let exists = path.is_file();
        Self { path, exists }
    }
}

/// The three prerequisite binaries of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifactSet {
    /// Bootloader image.
    pub bootloader: Prerequisite,
    /// Partition table image.
    pub partitions: Prerequisite,
    /// Application image.
    pub application: Prerequisite,
}

impl BuildArtifactSet {
    /// Check the build directory. Existence is read from disk on every call.
    pub fn scan(build_dir: &Path) -> Self {
        Self {
            bootloader: Prerequisite::scan(build_dir.join(BOOTLOADER_BIN)),
            partitions: Prerequisite::scan(build_dir.join(PARTITIONS_BIN)),
            application: Prerequisite::scan(build_dir.join(APPLICATION_BIN)),
        }
    }

    /// True if a setup image can be merged.
    pub fn all_exist(&self) -> bool {
        self.missing().is_empty()
    }

    /// Paths of the prerequisites that were absent.
    pub fn missing(&self) -> Vec<PathBuf> {
        [&self.bootloader, &self.partitions, &self.application]
            .into_iter()
            .filter(|p| !p.exists)
            .map(|p| p.path.clone())
            .collect()
    }

    /// The merge inputs, only if all three binaries exist.
    pub fn complete(&self) -> Option<CompleteArtifactSet> {
        self.all_exist().then(|| CompleteArtifactSet {
            bootloader: self.bootloader.path.clone(),
            partitions: self.partitions.path.clone(),
            application: self.application.path.clone(),
        })
    }
}

/// A [`BuildArtifactSet`] in which every binary was present.
///
/// Only obtainable through [`BuildArtifactSet::complete`], so a merge can
/// never be built from an incomplete set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteArtifactSet {
    bootloader: PathBuf,
    partitions: PathBuf,
    application: PathBuf,
}

impl CompleteArtifactSet {
    /// Bootloader image path.
    pub fn bootloader(&self) -> &Path {
        &self.bootloader
    }

    /// Partition table image path.
    pub fn partitions(&self) -> &Path {
        &self.partitions
    }

    /// Application image path.
    pub fn application(&self) -> &Path {
        &self.application
    }
}

/// Kind of release image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Application image alone, for over-the-air updates.
    AppImage,
    /// Bootloader + partition table + application, for first-time flashing.
    SetupImage,
}

impl ArtifactKind {
    /// File name prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::AppImage => "app",
            Self::SetupImage => "setup",
        }
    }
}

/// File name for an output image.
///
/// `{prefix}-firmware-{version}.bin`, except for an unversioned setup image.
/// Path separators in the version are replaced with `_` so the image always
/// lands directly in the build directory.
pub fn output_file_name(
    kind: ArtifactKind,
    version: &FirmwareVersion,
    naming: SetupNaming,
) -> String {
    if kind == ArtifactKind::SetupImage && naming == SetupNaming::Unversioned {
        return UNVERSIONED_SETUP_NAME.to_string();
    }
    format!(
        "{}-firmware-{}.{}",
        kind.prefix(),
        version.file_component(),
        IMAGE_EXTENSION
    )
}

/// Full path of an output image inside `build_dir`.
pub fn output_path(
    build_dir: &Path,
    kind: ArtifactKind,
    version: &FirmwareVersion,
    naming: SetupNaming,
) -> PathBuf {
    build_dir.join(output_file_name(kind, version, naming))
}

/// A release image that was written successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    /// Image kind.
    pub kind: ArtifactKind,
    /// Where it was written.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDir;

    fn v(s: &str) -> FirmwareVersion {
        FirmwareVersion::new(s)
    }

    #[test]
    fn test_app_name() {
        assert_eq!(
            output_file_name(ArtifactKind::AppImage, &v("1.2.3"), SetupNaming::Versioned),
            "app-firmware-1.2.3.bin"
        );
    }

    #[test]
    fn test_setup_name() {
        assert_eq!(
            output_file_name(ArtifactKind::SetupImage, &v("1.2.3"), SetupNaming::Versioned),
            "setup-firmware-1.2.3.bin"
        );
    }

    #[test]
    fn test_unknown_version_name() {
        assert_eq!(
            output_file_name(
                ArtifactKind::AppImage,
                &FirmwareVersion::unknown(),
                SetupNaming::Versioned
            ),
            "app-firmware-unknown.bin"
        );
    }

    #[test]
    fn test_unversioned_setup_name() {
        assert_eq!(
            output_file_name(ArtifactKind::SetupImage, &v("1.2.3"), SetupNaming::Unversioned),
            "merged-flash.bin"
        );
        // App image naming is unaffected
        assert_eq!(
            output_file_name(ArtifactKind::AppImage, &v("1.2.3"), SetupNaming::Unversioned),
            "app-firmware-1.2.3.bin"
        );
    }

    #[test]
    fn test_naming_is_deterministic() {
        let a = output_path(
            Path::new("/b"),
            ArtifactKind::SetupImage,
            &v("1.0.6"),
            SetupNaming::Versioned,
        );
        let b = output_path(
            Path::new("/b"),
            ArtifactKind::SetupImage,
            &v("1.0.6"),
            SetupNaming::Versioned,
        );
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/b/setup-firmware-1.0.6.bin"));
    }

    #[test]
    fn test_path_separators_replaced() {
        assert_eq!(
            output_file_name(ArtifactKind::AppImage, &v("1.0/beta\\2"), SetupNaming::Versioned),
            "app-firmware-1.0_beta_2.bin"
        );
    }

    #[test]
    fn test_scan_all_present() {
        let dir = TestDir::new("artifacts");
        dir.write_build_outputs(100, 50, 200);
        let set = BuildArtifactSet::scan(dir.path());
        assert!(set.all_exist());
        assert!(set.missing().is_empty());
        assert_eq!(set.application.path, dir.path().join("firmware.bin"));
    }

    #[test]
    fn test_scan_each_missing() {
        for name in [BOOTLOADER_BIN, PARTITIONS_BIN, APPLICATION_BIN] {
            let dir = TestDir::new("artifacts");
            dir.write_build_outputs(100, 50, 200);
            std::fs::remove_file(dir.path().join(name)).unwrap();

            let set = BuildArtifactSet::scan(dir.path());
            assert!(!set.all_exist(), "{} removed", name);
            assert!(set.complete().is_none());
            assert_eq!(set.missing(), vec![dir.path().join(name)]);
        }
    }

    #[test]
    fn test_complete_set_paths() {
        let dir = TestDir::new("artifacts");
        dir.write_build_outputs(1, 1, 1);
        let complete = BuildArtifactSet::scan(dir.path())
            .complete()
            .expect("all present");
        assert_eq!(complete.bootloader(), dir.path().join("bootloader.bin"));
        assert_eq!(complete.partitions(), dir.path().join("partitions.bin"));
        assert_eq!(complete.application(), dir.path().join("firmware.bin"));
    }

    #[test]
    fn test_directory_is_not_a_prerequisite() {
        let dir = TestDir::new("artifacts");
        dir.write_build_outputs(1, 1, 1);
        std::fs::remove_file(dir.path().join(PARTITIONS_BIN)).unwrap();
        std::fs::create_dir(dir.path().join(PARTITIONS_BIN)).unwrap();
        assert!(!BuildArtifactSet::scan(dir.path()).all_exist());
    }

    #[test]
    fn test_scan_empty_dir() {
        let dir = TestDir::new("artifacts");
        let set = BuildArtifactSet::scan(dir.path());
        assert_eq!(set.missing().len(), 3);
    }
}
