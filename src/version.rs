//! Version checking utilities for coqtop compatibility

use crate::error::{Error, Result};
use log::{debug, warn};
use std::path::Path;
use std::process::Command;
use std::sync::Once;

/// The latest coqtop version we've tested against
pub const TESTED_VERSION: &str = "8.6.1";

/// Ensures version warning is only shown once per session
static VERSION_CHECK: Once = Once::new();

/// Check the version of `program` and warn if newer than tested.
/// Only the first call in a process does anything.
pub fn check_coqtop_version(program: &Path) {
    VERSION_CHECK.call_once(|| match query_version(program) {
        Ok(Some(version)) => report(&version),
        Ok(None) => debug!("[VERSION] Could not determine coqtop version"),
        Err(e) => debug!("[VERSION] Failed to check coqtop version: {}", e),
    });
}

/// Run `coqtop --print-version` and return the Coq version it prints.
pub fn query_version(program: &Path) -> Result<Option<String>> {
    let output = Command::new(program)
        .arg("--print-version")
        .output()
        .map_err(Error::Io)?;

    if !output.status.success() {
        debug!("[VERSION] {} --print-version exited with {}", program.display(), output.status);
        return Ok(None);
    }

    Ok(parse_version_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Output looks like `8.6.1 4.02.3`: the Coq version, then the OCaml one.
fn parse_version_output(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .next()
        .filter(|v| v.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

fn report(version: &str) {
    if is_version_newer(version, TESTED_VERSION) {
        warn!(
            "coqtop version {} is newer than tested version {}; the XML protocol may have changed",
            version, TESTED_VERSION
        );
    } else {
        debug!(
            "[VERSION] coqtop {} is compatible (tested: {})",
            version, TESTED_VERSION
        );
    }
}

/// Compare two version strings (e.g., "8.6.1" vs "8.7"). Suffixes such as
/// `pl1` or `+beta2` end a component.
fn is_version_newer(version: &str, tested: &str) -> bool {
    fn parts(v: &str) -> Vec<u32> {
        v.split('.')
            .map_while(|s| {
                let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().ok()
            })
            .collect()
    }
    let v_parts = parts(version);
    let t_parts = parts(tested);

    use std::cmp::Ordering;

    for (v, t) in v_parts.iter().zip(&t_parts) {
        match v.cmp(t) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => continue,
        }
    }

    // If all compared parts are equal, longer version is newer
    v_parts.len() > t_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(is_version_newer("8.7.0", "8.6.1"));
        assert!(!is_version_newer("8.6.1", "8.6.1"));
        assert!(!is_version_newer("8.5", "8.6.1"));
        assert!(is_version_newer("8.6.1.1", "8.6.1"));
        assert!(is_version_newer("8.10.2", "8.6.1"));
        assert!(is_version_newer("8.7+beta2", "8.6.1"));
        assert!(!is_version_newer("8.6pl1", "8.6.1"));
    }

    #[test]
    fn test_parse_version_output() {
        assert_eq!(
            parse_version_output("8.6.1 4.02.3\n"),
            Some("8.6.1".to_string())
        );
        assert_eq!(parse_version_output(""), None);
        assert_eq!(parse_version_output("Welcome to Coq"), None);
    }

    #[test]
    fn test_missing_binary_is_an_io_error() {
        let err = query_version(Path::new("/nonexistent/coqtop-for-tests")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
