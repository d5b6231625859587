//! Build configuration for the release hook.
//!
//! A [`BuildConfig`] is constructed once per hook invocation from the values
//! the host build system hands over (project root, build directory,
//! interpreter) and then passed by reference to every component.
//!
//! # Example
//!
//! ```
//! use esp32_firmware_release::config::{BuildConfig, MergeTool};
//!
//! let config = BuildConfig::new("/work/blinds", "/work/blinds/.pio/build/c3")
//!     .with_merge_tool(MergeTool::python_module("/usr/bin/python3"));
//! assert!(config.validate().is_ok());
//! assert!(config.version_file.ends_with("include/config.h"));
//! ```

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Header holding the version macro, relative to the project root.
pub const DEFAULT_VERSION_FILE: &str = "include/config.h";

/// Name of the macro carrying the firmware version string.
pub const DEFAULT_VERSION_MACRO: &str = "FIRMWARE_VERSION";

/// Python module that implements `merge_bin`.
pub const ESPTOOL_MODULE: &str = "esptool";

/// How the merged setup image is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupNaming {
    /// `setup-firmware-{version}.bin`
    #[default]
    Versioned,
    /// `merged-flash.bin`, the name used before images carried a version.
    Unversioned,
}

/// Program plus leading arguments used to reach the merge utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTool {
    /// Executable to spawn.
    pub program: PathBuf,
    /// Arguments placed before the `merge_bin` arguments.
    pub leading_args: Vec<OsString>,
}

impl MergeTool {
    /// Run esptool as a module of the given interpreter (`<python> -m esptool`).
    pub fn python_module(python: impl Into<PathBuf>) -> Self {
        Self {
            program: python.into(),
            leading_args: vec!["-m".into(), ESPTOOL_MODULE.into()],
        }
    }

    /// Run a standalone esptool executable.
    pub fn executable(path: impl Into<PathBuf>) -> Self {
        Self {
            program: path.into(),
            leading_args: Vec::new(),
        }
    }
}

impl fmt::Display for MergeTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.leading_args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Everything the hook needs to know about one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Project root directory.
    pub project_root: PathBuf,
    /// Build output directory holding the prerequisite binaries.
    pub build_dir: PathBuf,
    /// Header file containing the version macro.
    pub version_file: PathBuf,
    /// Macro name searched for in `version_file`.
    pub version_macro: String,
    /// Merge utility, or `None` if none could be located.
    pub merge_tool: Option<MergeTool>,
    /// Upper bound on the merge process run time. `None` waits forever.
    pub merge_timeout: Option<Duration>,
    /// Setup image naming scheme.
    pub setup_naming: SetupNaming,
    /// Write a JSON release manifest next to the images.
    pub write_manifest: bool,
}

impl BuildConfig {
    /// Create a configuration with defaults for everything but the two directories.
    pub fn new(project_root: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let version_file = project_root.join(DEFAULT_VERSION_FILE);
        Self {
            project_root,
            build_dir: build_dir.into(),
            version_file,
            version_macro: DEFAULT_VERSION_MACRO.to_string(),
            merge_tool: None,
            merge_timeout: None,
            setup_naming: SetupNaming::default(),
            write_manifest: false,
        }
    }

    /// Use a different version header. Relative paths resolve against the project root.
    pub fn with_version_file(mut self, path: impl AsRef<Path>) -> Self {
        self.version_file = self.project_root.join(path);
        self
    }

    /// Search for a different macro name.
    pub fn with_version_macro(mut self, name: impl Into<String>) -> Self {
        self.version_macro = name.into();
        self
    }

    /// Set the merge utility.
    pub fn with_merge_tool(mut self, tool: MergeTool) -> Self {
        self.merge_tool = Some(tool);
        self
    }

    /// Bound the merge process run time.
    pub fn with_merge_timeout(mut self, timeout: Duration) -> Self {
        self.merge_timeout = Some(timeout);
        self
    }

    /// Choose the setup image naming scheme.
    pub fn with_setup_naming(mut self, naming: SetupNaming) -> Self {
        self.setup_naming = naming;
        self
    }

    /// Enable or disable the release manifest.
    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.write_manifest = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version_macro.is_empty() {
            return Err(ConfigError::EmptyMacroName);
        }
        if self.version_macro.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidMacroName(self.version_macro.clone()));
        }
        if self.merge_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.build_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBuildDir);
        }
        Ok(())
    }
}

/// Configuration errors. These are the only errors that stop the hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Version macro name is empty.
    EmptyMacroName,
    /// Version macro name contains whitespace.
    InvalidMacroName(String),
    /// Merge timeout of zero would kill every merge.
    ZeroTimeout,
    /// Build directory path is empty.
    EmptyBuildDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMacroName => write!(f, "version macro name is empty"),
            Self::InvalidMacroName(name) => {
                write!(f, "version macro name contains whitespace: {:?}", name)
            }
            Self::ZeroTimeout => write!(f, "merge timeout must be greater than zero"),
            Self::EmptyBuildDir => write!(f, "build directory is empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::new("/proj", "/proj/.pio/build/c3");
        assert_eq!(config.version_file, PathBuf::from("/proj/include/config.h"));
        assert_eq!(config.version_macro, "FIRMWARE_VERSION");
        assert_eq!(config.merge_tool, None);
        assert_eq!(config.merge_timeout, None);
        assert_eq!(config.setup_naming, SetupNaming::Versioned);
        assert!(!config.write_manifest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_version_file() {
        let config = BuildConfig::new("/proj", "/build").with_version_file("src/version.h");
        assert_eq!(config.version_file, PathBuf::from("/proj/src/version.h"));
    }

    #[test]
    fn test_absolute_version_file() {
        let config = BuildConfig::new("/proj", "/build").with_version_file("/etc/version.h");
        assert_eq!(config.version_file, PathBuf::from("/etc/version.h"));
    }

    #[test]
    fn test_python_module_tool() {
        let tool = MergeTool::python_module("/usr/bin/python3");
        assert_eq!(tool.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(tool.leading_args, vec![OsString::from("-m"), "esptool".into()]);
        assert_eq!(tool.to_string(), "/usr/bin/python3 -m esptool");
    }

    #[test]
    fn test_executable_tool() {
        let tool = MergeTool::executable("/opt/esptool");
        assert!(tool.leading_args.is_empty());
        assert_eq!(tool.to_string(), "/opt/esptool");
    }

    #[test]
    fn test_validate_empty_macro() {
        let config = BuildConfig::new("/proj", "/build").with_version_macro("");
        assert_eq!(config.validate(), Err(ConfigError::EmptyMacroName));
    }

    #[test]
    fn test_validate_macro_with_space() {
        let config = BuildConfig::new("/proj", "/build").with_version_macro("FW VERSION");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMacroName(_))
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = BuildConfig::new("/proj", "/build").with_merge_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_validate_empty_build_dir() {
        let config = BuildConfig::new("/proj", "");
        assert_eq!(config.validate(), Err(ConfigError::EmptyBuildDir));
    }
}
