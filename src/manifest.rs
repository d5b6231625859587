//! Release manifest.
//!
//! A JSON file written next to the images so an update server can verify
//! uploads by size and digest:
//!
//! ```json
//! {
//!   "version": "1.2.3",
//!   "chip": "esp32c3",
//!   "flash_mode": "dio",
//!   "flash_size": "4MB",
//!   "artifacts": [
//!     { "kind": "app_image", "file": "app-firmware-1.2.3.bin", "size": 200, "sha256": "..." }
//!   ]
//! }
//! ```

use crate::artifacts::{ArtifactKind, OutputArtifact};
use crate::merge::{CHIP, FLASH_MODE, FLASH_SIZE};
use crate::version::FirmwareVersion;
use log::info;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// One produced image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// Image kind.
    pub kind: ArtifactKind,
    /// File name within the build directory.
    pub file: String,
    /// Size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 of the file.
    pub sha256: String,
}

/// Summary of one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseManifest {
    /// Firmware version.
    pub version: FirmwareVersion,
    /// Target chip.
    pub chip: &'static str,
    /// Flash mode of the setup image.
    pub flash_mode: &'static str,
    /// Flash size of the setup image.
    pub flash_size: &'static str,
    /// Produced images, OTA image first.
    pub artifacts: Vec<ManifestEntry>,
}

impl ReleaseManifest {
    /// Hash every artifact and build the manifest.
    pub fn build(
        version: &FirmwareVersion,
        artifacts: &[&OutputArtifact],
    ) -> Result<Self, ManifestError> {
        let artifacts = artifacts
            .iter()
            .map(|a| {
                let sha256 = file_sha256(&a.path).map_err(|e| ManifestError::Hash {
                    path: a.path.clone(),
                    reason: e.to_string(),
                })?;
                Ok(ManifestEntry {
                    kind: a.kind,
                    file: a
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size: a.size,
                    sha256,
                })
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        Ok(Self {
            version: version.clone(),
            chip: CHIP,
            flash_mode: FLASH_MODE,
            flash_size: FLASH_SIZE,
            artifacts,
        })
    }

    /// Manifest file name for a version.
    pub fn file_name(version: &FirmwareVersion) -> String {
        format!("firmware-{}.json", version.file_component())
    }

    /// Entry for a given kind, if that image was produced.
    pub fn entry(&self, kind: ArtifactKind) -> Option<&ManifestEntry> {
        self.artifacts.iter().find(|e| e.kind == kind)
    }

    /// Write as pretty JSON into `build_dir` and return the path.
    pub fn write_to(&self, build_dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = build_dir.join(Self::file_name(&self.version));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ManifestError::Serialize(e.to_string()))?;
        fs::write(&path, json + "\n").map_err(|e| ManifestError::Write {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        info!("Release manifest written: {}", path.display());
        Ok(path)
    }
}

/// SHA-256 of a file as lowercase hex.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Errors building or writing the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// An artifact could not be read for hashing.
    Hash {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        reason: String,
    },
    /// JSON serialization failed.
    Serialize(String),
    /// The manifest file could not be written.
    Write {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        reason: String,
    },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash { path, reason } => write!(f, "cannot hash {}: {}", path.display(), reason),
            Self::Serialize(e) => write!(f, "cannot serialize manifest: {}", e),
            Self::Write { path, reason } => {
                write!(f, "cannot write {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ManifestError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDir;

    #[test]
    fn test_sha256_known_value() {
        let dir = TestDir::new("manifest");
        let path = dir.write("abc.bin", b"abc");
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_empty_file() {
        let dir = TestDir::new("manifest");
        let path = dir.write("empty.bin", b"");
        assert_eq!(
            file_sha256(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_build_and_write() {
        let dir = TestDir::new("manifest");
        let app_path = dir.write("app-firmware-1.2.3.bin", b"abc");
        let app = OutputArtifact {
            kind: ArtifactKind::AppImage,
            path: app_path,
            size: 3,
        };
        let version = FirmwareVersion::new("1.2.3");

        let manifest = ReleaseManifest::build(&version, &[&app]).unwrap();
        let entry = manifest.entry(ArtifactKind::AppImage).unwrap();
        assert_eq!(entry.file, "app-firmware-1.2.3.bin");
        assert_eq!(entry.size, 3);
        assert!(manifest.entry(ArtifactKind::SetupImage).is_none());

        let path = manifest.write_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("firmware-1.2.3.json"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], "1.2.3");
        assert_eq!(json["chip"], "esp32c3");
        assert_eq!(json["flash_size"], "4MB");
        assert_eq!(json["artifacts"][0]["kind"], "app_image");
        assert_eq!(
            json["artifacts"][0]["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_build_missing_artifact() {
        let dir = TestDir::new("manifest");
        let gone = OutputArtifact {
            kind: ArtifactKind::SetupImage,
            path: dir.path().join("setup-firmware-1.bin"),
            size: 10,
        };
        let err = ReleaseManifest::build(&FirmwareVersion::new("1"), &[&gone]).unwrap_err();
        assert!(matches!(err, ManifestError::Hash { .. }));
    }

    #[test]
    fn test_write_into_missing_dir() {
        let dir = TestDir::new("manifest");
        let manifest = ReleaseManifest::build(&FirmwareVersion::new("1"), &[]).unwrap();
        let err = manifest.write_to(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ManifestError::Write { .. }));
    }
}
