//! # office-process
//!
//! OS-level plumbing for supervising a local office suite
//! (LibreOffice / Apache OpenOffice):
//!
//! * locate an installation ([`find_office_home`], [`office_executable`]);
//! * validate the directories an instance needs ([`validate_office_home`],
//!   [`validate_working_dir`], [`validate_template_profile_dir`]);
//! * find and force-kill office processes by their command line
//!   ([`ProcessHandle`], [`default_process_handle`]).
//!
//! ## Why look processes up by command line?
//!
//! Each office instance is launched with a unique `--accept` string (its
//! private socket or pipe). When a previous run crashed or was killed, an
//! orphaned `soffice.bin` may still hold that endpoint, and the new instance
//! would silently connect to the old one. Searching the process table for the
//! accept string finds that orphan regardless of who started it.
//!
//! ## Platform support
//!
//! | OS       | Process listing                          | Kill                    |
//! |----------|------------------------------------------|-------------------------|
//! | Linux    | `/bin/ps -e -o pid,args`                 | `/bin/kill -KILL <pid>` |
//! | macOS    | `/bin/ps -e -o pid,args`                 | `/bin/kill -KILL <pid>` |
//! | FreeBSD  | `/bin/ps -e -o pid,args`                 | `/bin/kill -KILL <pid>` |
//! | Windows  | `wmic process get CommandLine,ProcessId` | `taskkill /F /PID <pid>`|
//!
//! ## Environment variable overrides
//!
//! - `OFFICE_HOME`: use this installation instead of probing the defaults.

use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by office-process operations.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The current OS has no process-handle implementation.
    #[error("Unsupported platform: {os}")]
    UnsupportedPlatform { os: String },

    /// A process-table or kill command could not be run.
    #[error("Command '{command}' failed: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The kill command ran but reported a failure.
    #[error("Could not kill process {pid}: {detail}")]
    Kill { pid: u32, detail: String },

    /// No office installation was found and none was configured.
    #[error("No office installation found; set OFFICE_HOME or configure the office home")]
    OfficeHomeNotFound,

    /// A configured directory does not satisfy an instance's needs.
    #[error("Invalid {what} '{path}': {reason}")]
    InvalidDirectory {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },
}

// ── Process lookup ───────────────────────────────────────────────────────────

/// Identifies an office process by executable name and a command-line
/// argument (typically the `--accept` string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessQuery {
    pub command: String,
    pub argument: String,
}

impl ProcessQuery {
    pub fn new(command: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            argument: argument.into(),
        }
    }

    /// Whether a process command line belongs to this query.
    pub fn matches(&self, command_line: &str) -> bool {
        command_line.contains(&self.command) && command_line.contains(&self.argument)
    }
}

/// Platform capability to find an office process and kill it.
///
/// Both calls block on a child process, so async callers should run them
/// inside `spawn_blocking`.
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    /// Returns the PID of the first running process matching `query`.
    fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, ProcessError>;

    /// Forcibly terminates `pid`.
    fn kill(&self, pid: u32) -> Result<(), ProcessError>;
}

static PS_OUTPUT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<pid>\d+)\s+(?P<command_line>.*)$").unwrap());

static WMIC_OUTPUT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<command_line>.*?)\s+(?P<pid>\d+)\s*$").unwrap());

/// Splits one `ps -o pid,args` line into `(pid, command line)`.
pub fn parse_ps_line(line: &str) -> Option<(u32, &str)> {
    parse_line(&PS_OUTPUT_LINE, line)
}

/// Splits one `wmic ... get CommandLine,ProcessId` line into `(pid, command line)`.
pub fn parse_wmic_line(line: &str) -> Option<(u32, &str)> {
    parse_line(&WMIC_OUTPUT_LINE, line)
}

fn parse_line<'a>(pattern: &Regex, line: &'a str) -> Option<(u32, &'a str)> {
    let caps = pattern.captures(line)?;
    let pid = caps.name("pid")?.as_str().parse().ok()?;
    let command_line = caps.name("command_line")?.as_str();
    Some((pid, command_line))
}

fn run(args: &[String]) -> Result<std::process::Output, ProcessError> {
    let (program, rest) = args.split_first().ok_or_else(|| ProcessError::Command {
        command: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;
    debug!("Running {:?}", args);
    Command::new(program)
        .args(rest)
        .output()
        .map_err(|source| ProcessError::Command {
            command: args.join(" "),
            source,
        })
}

/// `ps`/`kill` based handle for Unix-like systems.
///
/// `run_as_args` prefixes every command (e.g. `["sudo", "-u", "office"]`)
/// when the office processes belong to another user.
#[derive(Debug, Clone, Default)]
pub struct UnixProcessHandle {
    run_as_args: Vec<String>,
}

impl UnixProcessHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_as<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            run_as_args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self, args: &[&str]) -> Vec<String> {
        self.run_as_args
            .iter()
            .cloned()
            .chain(args.iter().map(|s| s.to_string()))
            .collect()
    }
}

impl ProcessHandle for UnixProcessHandle {
    fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, ProcessError> {
        let output = run(&self.command(&["/bin/ps", "-e", "-o", "pid,args"]))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(parse_ps_line)
            .find(|(_, command_line)| query.matches(command_line))
            .map(|(pid, _)| pid))
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        let pid_arg = pid.to_string();
        let output = run(&self.command(&["/bin/kill", "-KILL", &pid_arg]))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ProcessError::Kill {
                pid,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// `wmic`/`taskkill` based handle for Windows.
#[derive(Debug, Clone, Default)]
pub struct WindowsProcessHandle;

impl ProcessHandle for WindowsProcessHandle {
    fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, ProcessError> {
        let filter = format!("name like '%{}%'", query.command);
        let args: Vec<String> = [
            "wmic",
            "process",
            "where",
            filter.as_str(),
            "get",
            "CommandLine,ProcessId",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let output = run(&args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(parse_wmic_line)
            .find(|(_, command_line)| query.matches(command_line))
            .map(|(pid, _)| pid))
    }

    fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        let pid_arg = pid.to_string();
        let args: Vec<String> = ["taskkill", "/F", "/PID", pid_arg.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = run(&args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ProcessError::Kill {
                pid,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Returns the process handle for the current OS.
pub fn default_process_handle() -> Result<Box<dyn ProcessHandle>, ProcessError> {
    match std::env::consts::OS {
        "linux" | "macos" | "freebsd" | "openbsd" | "netbsd" | "solaris" => {
            Ok(Box::new(UnixProcessHandle::new()))
        }
        "windows" => Ok(Box::new(WindowsProcessHandle)),
        os => Err(ProcessError::UnsupportedPlatform { os: os.to_string() }),
    }
}

// ── Office installation ──────────────────────────────────────────────────────

const EXECUTABLE_DEFAULT: &str = "program/soffice.bin";
const EXECUTABLE_MAC: &str = "program/soffice";
const EXECUTABLE_MAC_41: &str = "MacOS/soffice";
const EXECUTABLE_WINDOWS: &str = "program/soffice.exe";

/// Path of the office executable inside `office_home` for the current OS.
pub fn office_executable(office_home: &Path) -> PathBuf {
    match std::env::consts::OS {
        "macos" => {
            // Layout changed in LibreOffice 4.1.
            let modern = office_home.join(EXECUTABLE_MAC_41);
            if modern.is_file() {
                modern
            } else {
                office_home.join(EXECUTABLE_MAC)
            }
        }
        "windows" => office_home.join(EXECUTABLE_WINDOWS),
        _ => office_home.join(EXECUTABLE_DEFAULT),
    }
}

/// Default install locations probed by [`find_office_home`], in order.
pub fn office_home_candidates() -> Vec<PathBuf> {
    match std::env::consts::OS {
        "windows" => {
            let program_files = std::env::var_os("ProgramFiles").map(PathBuf::from);
            let program_files_x86 = std::env::var_os("ProgramFiles(x86)").map(PathBuf::from);
            let mut out = Vec::new();
            for (base, name) in [
                (&program_files, "LibreOffice"),
                (&program_files, "LibreOffice 5"),
                (&program_files_x86, "LibreOffice 5"),
                (&program_files_x86, "OpenOffice 4"),
                (&program_files, "LibreOffice 4"),
                (&program_files_x86, "LibreOffice 4"),
            ] {
                if let Some(base) = base {
                    out.push(base.join(name));
                }
            }
            out
        }
        "macos" => {
            let mut out: Vec<PathBuf> = [
                "/Applications/LibreOffice.app/Contents",
                "/Applications/OpenOffice.app/Contents",
                "/Applications/OpenOffice.org.app/Contents",
            ]
            .iter()
            .map(PathBuf::from)
            .collect();
            if let Some(home) = dirs::home_dir() {
                out.push(home.join("Applications/LibreOffice.app/Contents"));
            }
            out
        }
        _ => [
            "/usr/lib64/libreoffice",
            "/usr/lib/libreoffice",
            "/usr/local/lib64/libreoffice",
            "/usr/local/lib/libreoffice",
            "/opt/libreoffice",
            "/usr/lib64/openoffice",
            "/usr/lib/openoffice",
            "/opt/openoffice4",
        ]
        .iter()
        .map(PathBuf::from)
        .collect(),
    }
}

/// Locates an office installation.
///
/// `OFFICE_HOME` wins when set; otherwise the first candidate from
/// [`office_home_candidates`] that contains the executable is returned.
pub fn find_office_home() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("OFFICE_HOME") {
        return Some(PathBuf::from(home));
    }
    office_home_candidates()
        .into_iter()
        .find(|home| office_executable(home).is_file())
}

/// Checks that `office_home` is a directory holding the office executable.
pub fn validate_office_home(office_home: &Path) -> Result<(), ProcessError> {
    if !office_home.is_dir() {
        return Err(invalid("office home", office_home, "not a directory"));
    }
    if !office_executable(office_home).is_file() {
        return Err(invalid(
            "office home",
            office_home,
            "it doesn't contain the soffice executable",
        ));
    }
    Ok(())
}

/// Checks that `working_dir` is an existing, writable directory.
pub fn validate_working_dir(working_dir: &Path) -> Result<(), ProcessError> {
    let meta = std::fs::metadata(working_dir)
        .map_err(|e| invalid("working directory", working_dir, &e.to_string()))?;
    if !meta.is_dir() {
        return Err(invalid("working directory", working_dir, "not a directory"));
    }
    if meta.permissions().readonly() {
        return Err(invalid("working directory", working_dir, "not writable"));
    }
    Ok(())
}

/// Checks that `template_profile_dir` holds an office user profile.
pub fn validate_template_profile_dir(template_profile_dir: &Path) -> Result<(), ProcessError> {
    if template_profile_dir.join("user").is_dir() {
        Ok(())
    } else {
        Err(invalid(
            "template profile directory",
            template_profile_dir,
            "it doesn't appear to contain a user profile",
        ))
    }
}

fn invalid(what: &'static str, path: &Path, reason: &str) -> ProcessError {
    ProcessError::InvalidDirectory {
        what,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Builds the `file://` URL office expects for a local path
/// (used for `-env:UserInstallation=`).
pub fn to_file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let url = if raw.starts_with("//") {
        format!("file:{raw}")
    } else if raw.starts_with('/') {
        format!("file://{raw}")
    } else {
        format!("file:///{raw}")
    };
    url.trim_end_matches('/').to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
