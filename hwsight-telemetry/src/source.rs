//! Raw source adapters.
//!
//! One-shot accessors that return unparsed text, bytes or records from a
//! named OS channel. Failures (missing file, permission denied, tool not
//! installed, non-zero exit) come back as empty or `None`; nothing here
//! returns an error to the layers above.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::decode::parse_key_values;

/// Text, byte and directory access keyed by path.
pub trait TextSource: Send + Sync {
    /// Whole file as UTF-8 (lossy); `None` when unreadable.
    fn read_string(&self, path: &Path) -> Option<String>;

    fn read_bytes(&self, path: &Path) -> Option<Vec<u8>>;

    /// Sorted entry names of a directory; empty when unreadable.
    fn list_dir(&self, path: &Path) -> Vec<String>;

    fn read_link(&self, path: &Path) -> Option<PathBuf>;

    fn canonicalize(&self, path: &Path) -> Option<PathBuf>;

    fn exists(&self, path: &Path) -> bool;

    /// File split into lines; empty when unreadable.
    fn read_lines(&self, path: &Path) -> Vec<String> {
        self.read_string(path)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// First line, trimmed; `None` when unreadable or empty.
    fn read_trimmed(&self, path: &Path) -> Option<String> {
        let s = self.read_string(path)?;
        let line = s.lines().next()?.trim();
        (!line.is_empty()).then(|| line.to_string())
    }

    /// `key<delimiter>value` map of a status-style file.
    fn read_key_values(&self, path: &Path, delimiter: char) -> BTreeMap<String, String> {
        parse_key_values(&self.read_lines(path), delimiter)
    }
}

/// [`TextSource`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl TextSource for FsSource {
    fn read_string(&self, path: &Path) -> Option<String> {
        match std::fs::read(path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                trace!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn read_bytes(&self, path: &Path) -> Option<Vec<u8>> {
        std::fs::read(path).ok()
    }

    fn list_dir(&self, path: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(path) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn read_link(&self, path: &Path) -> Option<PathBuf> {
        std::fs::read_link(path).ok()
    }

    fn canonicalize(&self, path: &Path) -> Option<PathBuf> {
        std::fs::canonicalize(path).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Runs an external command and captures its standard output.
pub trait CommandRunner: Send + Sync {
    /// Stdout lines of `program args...`; empty when the tool is missing or
    /// exits non-zero.
    fn run(&self, program: &str, args: &[&str]) -> Vec<String>;
}

/// [`CommandRunner`] that spawns real processes with a C locale.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Vec<String> {
        let output = Command::new(program)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::to_string)
                .collect(),
            Ok(out) => {
                debug!("{} exited with {}", program, out.status);
                Vec::new()
            }
            Err(e) => {
                debug!("Cannot run {}: {}", program, e);
                Vec::new()
            }
        }
    }
}

/// [`CommandRunner`] that replays captured output, keyed by the full command
/// line (`"program arg1 arg2"`). Unknown commands produce nothing, as if the
/// tool were not installed.
#[derive(Debug, Clone, Default)]
pub struct CannedCommandRunner {
    outputs: HashMap<String, Vec<String>>,
}

impl CannedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the output of a command line.
    pub fn with(mut self, command_line: &str, output: &str) -> Self {
        self.outputs.insert(
            command_line.to_string(),
            output.lines().map(str::to_string).collect(),
        );
        self
    }
}

impl CommandRunner for CannedCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Vec<String> {
        let mut key = program.to_string();
        for arg in args {
            key.push(' ');
            key.push_str(arg);
        }
        self.outputs.get(&key).cloned().unwrap_or_default()
    }
}

/// A [`CommandRunner`] gated by the configured fallback permissions.
#[derive(Clone)]
pub struct Commands {
    runner: Arc<dyn CommandRunner>,
    allowed: bool,
    privileged_allowed: bool,
}

impl Commands {
    pub fn new(runner: Arc<dyn CommandRunner>, allowed: bool, privileged_allowed: bool) -> Self {
        Self {
            runner,
            allowed,
            privileged_allowed,
        }
    }

    /// Commands that never run anything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(CannedCommandRunner::new()), false, false)
    }

    pub fn run(&self, program: &str, args: &[&str]) -> Vec<String> {
        if !self.allowed {
            return Vec::new();
        }
        self.runner.run(program, args)
    }

    /// Run a command that normally needs elevated privileges.
    pub fn run_privileged(&self, program: &str, args: &[&str]) -> Vec<String> {
        if !self.privileged_allowed {
            return Vec::new();
        }
        self.run(program, args)
    }

    /// First non-empty output line, trimmed.
    pub fn first_line(&self, program: &str, args: &[&str]) -> Option<String> {
        self.run(program, args)
            .into_iter()
            .map(|l| l.trim().to_string())
            .find(|l| !l.is_empty())
    }
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("allowed", &self.allowed)
            .field("privileged_allowed", &self.privileged_allowed)
            .finish()
    }
}

/// Native counters and process-lifetime constants.
pub trait NativeCounters: Send + Sync {
    /// 1, 5 and 15 minute load averages.
    fn load_average(&self) -> Option<[f64; 3]>;

    /// Boot time in Unix epoch seconds.
    fn boot_time_secs(&self) -> Option<u64>;

    fn clock_ticks_per_second(&self) -> Option<u64>;

    fn page_size(&self) -> Option<u64>;
}

/// [`NativeCounters`] backed by `sysinfo`, and `procfs` on Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCounters;

impl NativeCounters for SystemCounters {
    fn load_average(&self) -> Option<[f64; 3]> {
        if cfg!(windows) {
            return None;
        }
        let load = sysinfo::System::load_average();
        Some([load.one, load.five, load.fifteen])
    }

    fn boot_time_secs(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            if let Ok(secs) = procfs::boot_time_secs() {
                return Some(secs);
            }
        }
        Some(sysinfo::System::boot_time()).filter(|t| *t > 0)
    }

    fn clock_ticks_per_second(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            Some(procfs::ticks_per_second()).filter(|t| *t > 0)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    fn page_size(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            Some(procfs::page_size()).filter(|p| *p > 0)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

/// Fixed counter values, for replaying a captured machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCounters {
    pub load_average: Option<[f64; 3]>,
    pub boot_time_secs: Option<u64>,
    pub clock_ticks_per_second: Option<u64>,
    pub page_size: Option<u64>,
}

impl NativeCounters for FixedCounters {
    fn load_average(&self) -> Option<[f64; 3]> {
        self.load_average
    }

    fn boot_time_secs(&self) -> Option<u64> {
        self.boot_time_secs
    }

    fn clock_ticks_per_second(&self) -> Option<u64> {
        self.clock_ticks_per_second
    }

    fn page_size(&self) -> Option<u64> {
        self.page_size
    }
}
