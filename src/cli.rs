//! Builder for launching coqtop in IDE-slave mode.
//!
//! The [`CoqtopBuilder`] produces commands of the form
//! `coqtop -ideslave -main-channel stdfds -async-proofs on [extra args]`:
//! the XML protocol runs over the child's stdin/stdout and proofs are checked
//! by background workers.
//!
//! # Example
//!
//! ```no_run
//! use coqtop_codes::CoqtopBuilder;
//!
//! let child = CoqtopBuilder::new()
//!     .command("/opt/coq/bin/coqtop")
//!     .args(["-R", "theories", "MyLib"])
//!     .spawn()?;
//! # Ok::<(), coqtop_codes::Error>(())
//! ```

use crate::error::{Error, Result};
use log::debug;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Flags every session needs, in order.
const BASE_ARGS: [&str; 5] = ["-ideslave", "-main-channel", "stdfds", "-async-proofs", "on"];

/// Builder for a coqtop subprocess.
#[derive(Debug, Clone)]
pub struct CoqtopBuilder {
    command: PathBuf,
    working_directory: Option<PathBuf>,
    args: Vec<String>,
}

impl Default for CoqtopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoqtopBuilder {
    /// Create a builder that runs `coqtop` from `PATH`.
    pub fn new() -> Self {
        Self {
            command: PathBuf::from("coqtop"),
            working_directory: None,
            args: Vec::new(),
        }
    }

    /// Set custom path to the coqtop binary.
    pub fn command<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.command = path.into();
        self
    }

    /// Set the working directory for the coqtop process.
    pub fn working_directory<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Append extra arguments, e.g. the ones read from a `_CoqProject`.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Replace the extra arguments.
    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn program(&self) -> &PathBuf {
        &self.command
    }

    /// Build the full argument list.
    pub fn build_args(&self) -> Vec<String> {
        BASE_ARGS
            .iter()
            .map(|s| s.to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Spawn coqtop with piped stdin/stdout.
    ///
    /// On Unix the child gets its own process group so a Ctrl-C aimed at the
    /// editor does not interrupt a worker mid-command.
    pub fn spawn(&self) -> Result<Child> {
        let args = self.build_args();

        debug!(
            "[CLI] Spawning coqtop: {} {}",
            self.command.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&args).stdin(Stdio::piped()).stdout(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.stderr(Stdio::inherit()).process_group(0);
        }
        #[cfg(windows)]
        cmd.stderr(Stdio::null());

        if let Some(ref dir) = self.working_directory {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|source| Error::Spawn {
            command: self.command.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let builder = CoqtopBuilder::new();
        assert_eq!(
            builder.build_args(),
            vec!["-ideslave", "-main-channel", "stdfds", "-async-proofs", "on"]
        );
    }

    #[test]
    fn test_extra_args_follow_base_args() {
        let builder = CoqtopBuilder::new().args(["-Q", "theories", "Foo"]);
        let args = builder.build_args();
        assert_eq!(args.len(), 8);
        assert_eq!(&args[5..], ["-Q", "theories", "Foo"]);
    }

    #[test]
    fn test_custom_command() {
        let builder = CoqtopBuilder::new().command("/usr/local/bin/coqtop");
        assert_eq!(builder.program(), &PathBuf::from("/usr/local/bin/coqtop"));
    }

    #[test]
    fn test_working_directory() {
        let builder = CoqtopBuilder::new().working_directory("/tmp/work");
        assert_eq!(builder.working_directory, Some(PathBuf::from("/tmp/work")));
    }

    #[test]
    fn test_spawn_missing_binary() {
        let err = CoqtopBuilder::new()
            .command("/nonexistent/coqtop-for-tests")
            .spawn()
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/coqtop-for-tests"));
    }
}
