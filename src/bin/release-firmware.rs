//! Post-build release hook for ESP32-C3 firmware.
//!
//! Produces `app-firmware-{version}.bin` (OTA image) and
//! `setup-firmware-{version}.bin` (bootloader + partition table +
//! application merged for first-time flashing) in the build directory.
//!
//! Usage:
//!   release-firmware --build-dir .pio/build/esp32c3
//!
//! PlatformIO exports `PROJECT_DIR`, `BUILD_DIR` and `PYTHONEXE`, so when
//! run from an extra script the flags can be omitted.
//!
//! Artifact failures are reported but never fail the build: the process
//! exits 0 unless the arguments themselves are invalid.

use clap::Parser;
use esp32_firmware_release::config::{BuildConfig, MergeTool, SetupNaming, DEFAULT_VERSION_MACRO};
use esp32_firmware_release::host_utils::resolve_merge_tool;
use esp32_firmware_release::merge::ProcessRunner;
use esp32_firmware_release::run_hook;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "release-firmware")]
#[command(about = "Create versioned OTA and setup images after a firmware build", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root directory
    #[arg(long, env = "PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Build output directory containing bootloader.bin, partitions.bin and firmware.bin
    #[arg(long, env = "BUILD_DIR")]
    build_dir: PathBuf,

    /// Python interpreter used to run `-m esptool`
    #[arg(long, env = "PYTHONEXE")]
    python: Option<PathBuf>,

    /// Standalone esptool executable (overrides --python)
    #[arg(long)]
    esptool: Option<PathBuf>,

    /// Header containing the version macro, relative to the project directory
    #[arg(long)]
    version_file: Option<PathBuf>,

    /// Name of the version macro
    #[arg(long, default_value = DEFAULT_VERSION_MACRO)]
    version_macro: String,

    /// Kill the merge tool after this many seconds (default: wait forever)
    #[arg(long, value_name = "SECS")]
    merge_timeout: Option<u64>,

    /// Name the setup image merged-flash.bin instead of setup-firmware-{version}.bin
    #[arg(long)]
    unversioned: bool,

    /// Also write firmware-{version}.json with sizes and SHA-256 digests
    #[arg(long)]
    manifest: bool,
}

impl Cli {
    fn into_config(self) -> BuildConfig {
        let mut config = BuildConfig::new(self.project_dir, self.build_dir)
            .with_version_macro(self.version_macro)
            .with_manifest(self.manifest);

        if let Some(path) = self.version_file {
            config = config.with_version_file(path);
        }
        if let Some(secs) = self.merge_timeout {
            config = config.with_merge_timeout(Duration::from_secs(secs));
        }
        if self.unversioned {
            config = config.with_setup_naming(SetupNaming::Unversioned);
        }

        let tool = match self.esptool {
            Some(path) => Some(MergeTool::executable(path)),
            None => resolve_merge_tool(self.python.as_deref()),
        };
        match tool {
            Some(tool) => {
                info!("Merge tool: {}", tool);
                config.with_merge_tool(tool)
            }
            None => {
                warn!("No esptool found; setup image will not be created");
                config
            }
        }
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        exit(2);
    }

    info!("=== Creating release images in {} ===", config.build_dir.display());
    let report = run_hook(&config, &ProcessRunner);

    println!("\n=== Release summary ===");
    print!("{}", report);
}
