//! Setup image merging.
//!
//! The setup image is produced by esptool's `merge_bin`, which lays the
//! bootloader, partition table and application out at their flash offsets
//! in one file. This module builds that command line and runs it.
//!
//! The command is executed directly as an argument vector. No shell is
//! involved, so paths and versions containing spaces, quotes or `$` are
//! passed through untouched.
//!
//! # Command layout
//!
//! ```text
//! <tool> --chip esp32c3 merge_bin -o <output> --flash_mode dio --flash_size 4MB \
//!     0x0 <bootloader> 0x8000 <partitions> 0x10000 <application>
//! ```

use crate::artifacts::{ArtifactKind, CompleteArtifactSet, OutputArtifact};
use crate::config::MergeTool;
use crate::host_utils::{run_captured, CapturedOutput, ProcessError};
use log::{debug, info};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Target chip identifier passed to esptool.
pub const CHIP: &str = "esp32c3";

/// SPI flash mode written into the image header.
pub const FLASH_MODE: &str = "dio";

/// Flash size written into the image header.
pub const FLASH_SIZE: &str = "4MB";

/// Boot ROM loads the second-stage bootloader from here.
pub const BOOTLOADER_OFFSET: u32 = 0x0;

/// Default partition table location.
pub const PARTITIONS_OFFSET: u32 = 0x8000;

/// First application partition.
pub const APPLICATION_OFFSET: u32 = 0x10000;

/// One (offset, file) pair of the merged image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Flash offset in bytes.
    pub offset: u32,
    /// Source file.
    pub path: PathBuf,
}

impl Segment {
    /// Offset formatted the way esptool expects it.
    pub fn offset_arg(&self) -> String {
        format!("{:#x}", self.offset)
    }
}

/// Fully built `merge_bin` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommand {
    program: PathBuf,
    args: Vec<OsString>,
    output: PathBuf,
    segments: [Segment; 3],
}

impl MergeCommand {
    /// Build the command merging `inputs` into `output`.
    pub fn new(tool: &MergeTool, inputs: &CompleteArtifactSet, output: &Path) -> Self {
        let segments = [
            Segment {
                offset: BOOTLOADER_OFFSET,
                path: inputs.bootloader().to_path_buf(),
            },
            Segment {
                offset: PARTITIONS_OFFSET,
                path: inputs.partitions().to_path_buf(),
            },
            Segment {
                offset: APPLICATION_OFFSET,
                path: inputs.application().to_path_buf(),
            },
        ];

        let mut args = tool.leading_args.clone();
        args.extend(["--chip", CHIP, "merge_bin", "-o"].map(OsString::from));
        args.push(output.as_os_str().to_os_string());
        args.extend(
            ["--flash_mode", FLASH_MODE, "--flash_size", FLASH_SIZE].map(OsString::from),
        );
        for segment in &segments {
            args.push(segment.offset_arg().into());
            args.push(segment.path.as_os_str().to_os_string());
        }

        Self {
            program: tool.program.clone(),
            args,
            output: output.to_path_buf(),
            segments,
        }
    }

    /// Executable to spawn.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments, in order.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Image the tool will write.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Segments in flash order.
    pub fn segments(&self) -> &[Segment; 3] {
        &self.segments
    }

    /// A `std::process::Command` ready to run.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for MergeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Executes a [`MergeCommand`].
///
/// [`ProcessRunner`] spawns the real tool; tests substitute a fake.
pub trait CommandRunner {
    /// Run to completion and return the captured result.
    fn run(
        &self,
        command: &MergeCommand,
        timeout: Option<Duration>,
    ) -> Result<CapturedOutput, ProcessError>;
}

/// Runs the merge tool as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        command: &MergeCommand,
        timeout: Option<Duration>,
    ) -> Result<CapturedOutput, ProcessError> {
        run_captured(command.to_command(), timeout)
    }
}

/// Produces setup images through a [`CommandRunner`].
pub struct ImageMerger<'a, R: CommandRunner> {
    runner: &'a R,
    timeout: Option<Duration>,
}

impl<'a, R: CommandRunner> ImageMerger<'a, R> {
    /// Create a merger. `timeout` of `None` waits for the tool indefinitely.
    pub fn new(runner: &'a R, timeout: Option<Duration>) -> Self {
        Self { runner, timeout }
    }

    /// Merge `inputs` into `output` and return the produced image.
    pub fn merge(
        &self,
        tool: &MergeTool,
        inputs: &CompleteArtifactSet,
        output: &Path,
    ) -> Result<OutputArtifact, MergeError> {
        let command = MergeCommand::new(tool, inputs, output);
        info!("Creating merged firmware: {}", output.display());
        debug!("Running: {}", command);

        let result = self.runner.run(&command, self.timeout)?;

        if !result.success {
            return Err(MergeError::ToolFailed {
                code: result.code,
                diagnostic: result.diagnostic().to_string(),
            });
        }

        let size = fs::metadata(output)
            .map_err(|e| MergeError::OutputUnreadable {
                path: output.to_path_buf(),
                reason: e.to_string(),
            })?
            .len();

        Ok(OutputArtifact {
            kind: ArtifactKind::SetupImage,
            path: output.to_path_buf(),
            size,
        })
    }
}

/// Errors producing the setup image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// No merge tool could be located.
    ToolNotFound,
    /// The tool could not be run, or was killed.
    Process(ProcessError),
    /// The tool exited with a non-zero code.
    ToolFailed {
        /// Exit code, `None` if killed by a signal.
        code: Option<i32>,
        /// Captured stderr (or stdout).
        diagnostic: String,
    },
    /// The tool reported success but its output cannot be read.
    OutputUnreadable {
        /// Expected output file.
        path: PathBuf,
        /// Underlying I/O error.
        reason: String,
    },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolNotFound => write!(f, "merge tool not found (install esptool or pass --python)"),
            Self::Process(e) => write!(f, "{}", e),
            Self::ToolFailed {
                code: Some(code),
                diagnostic,
            } => write!(f, "esptool exited with code {}: {}", code, diagnostic),
            Self::ToolFailed {
                code: None,
                diagnostic,
            } => write!(f, "esptool terminated by signal: {}", diagnostic),
            Self::OutputUnreadable { path, reason } => {
                write!(f, "cannot read {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for MergeError {}

impl From<ProcessError> for MergeError {
    fn from(e: ProcessError) -> Self {
        MergeError::Process(e)
    }
}
