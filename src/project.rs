//! Launch arguments from a `_CoqProject` file.
//!
//! A project file is written for `coq_makefile`, so most of it means nothing
//! to coqtop. [`parse_project_args`] keeps the load-path options and the
//! explicit `-arg` pass-throughs and drops the rest.
//!
//! ```
//! use coqtop_codes::project::parse_project_args;
//!
//! let args = parse_project_args(&["-R", "theories", "Foo", "-arg", "-w", "foo.v"])?;
//! assert_eq!(args, ["-R", "theories", "Foo", "-w"]);
//! # Ok::<(), coqtop_codes::Error>(())
//! ```

use crate::error::{Error, Result};
use log::debug;
use std::path::{Path, PathBuf};

/// Name of the project file looked up next to sources.
pub const PROJECT_FILE_NAME: &str = "_CoqProject";

/// Filter project-file tokens down to the ones coqtop accepts.
pub fn parse_project_args<S: AsRef<str>>(args: &[S]) -> Result<Vec<String>> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let mut rest = args.as_slice();
    let mut kept = Vec::new();

    while !rest.is_empty() {
        let consumed = match rest {
            ["-h" | "-help" | "-no-opt" | "-byte" | "-full" | "-opt" | "-no-install", ..] => 1,
            ["-impredicative-set", ..] => {
                kept.push("-impredicative-set".to_string());
                1
            }
            ["-install", _, ..] => 2,
            ["-custom" | "-extra" | "-extra-phony", _, _, _, ..] => 4,
            [flag @ ("-Q" | "-R"), physical, logical, ..] => {
                kept.extend([flag, physical, logical].map(|s| s.to_string()));
                3
            }
            ["-I", dir, ..] => {
                kept.push("-I".to_string());
                kept.push(dir.to_string());
                2
            }
            ["-f", _, ..] => {
                return Err(Error::Project("-f not supported".to_string()));
            }
            [flag @ ("-Q" | "-R" | "-I" | "-custom" | "-extra" | "-extra-phony" | "-f"), ..] => {
                return Err(Error::Project(format!("{} needs an argument", flag)));
            }
            ["-o", _, ..] => 2,
            [_, "=", _, ..] => 3,
            ["-arg", value, ..] => {
                kept.push(value.to_string());
                2
            }
            [_, ..] => 1,
            [] => break,
        };
        rest = &rest[consumed..];
    }

    Ok(kept)
}

/// Split a project file into tokens the way a shell would, ignoring `#`
/// comments.
pub fn tokenize(contents: &str) -> Result<Vec<String>> {
    let stripped: String = contents
        .lines()
        .map(strip_comment)
        .collect::<Vec<_>>()
        .join("\n");
    shlex::split(&stripped)
        .ok_or_else(|| Error::Project("unbalanced quotes in project file".to_string()))
}

/// Drop everything from a `#` that starts a word, outside quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev_is_space = true;
    for (idx, c) in line.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' && prev_is_space => return &line[..idx],
            None => {}
        }
        prev_is_space = c.is_whitespace();
    }
    line
}

/// Nearest `_CoqProject` in the directory of `source` or any parent.
pub fn find_project_file(source: &Path) -> Option<PathBuf> {
    let start = match source.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let start = std::fs::canonicalize(&start).unwrap_or(start);
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Read and filter a project file.
pub fn parse_project_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    let args = parse_project_args(&tokenize(&contents)?)?;
    debug!("[PROJECT] {} -> {:?}", path.display(), args);
    Ok(args)
}

/// Extra coqtop arguments for editing `source`; empty without a project file.
pub fn project_args_for(source: &Path) -> Result<Vec<String>> {
    match find_project_file(source) {
        Some(path) => parse_project_file(&path),
        None => Ok(Vec::new()),
    }
}
