//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code
//! - Wall-clock reads only through the injectable clock
//! - No panicking shortcuts (`unwrap()`) in production code
//!
//! These tests are designed to catch violations early in the development cycle.
//! The helpers below are shared by the tests under `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["widget/core/src", "widget/host/src"];

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files below `dir` (relative to the workspace root)
#[must_use]
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Production lines of a source file as `(line_number, code)`
///
/// Everything from the first `#[cfg(test)]` on is test code and skipped,
/// as are trailing `//` comments and doc comments.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter_map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            if code.trim().is_empty() {
                None
            } else {
                Some((idx + 1, code.to_string()))
            }
        })
        .collect()
}

/// Find production lines matching `predicate` in every production directory
///
/// `exempt` names files (by file name) the rule does not apply to.
#[must_use]
pub fn find_violations(predicate: impl Fn(&str) -> bool, exempt: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_files(dir) {
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if exempt.contains(&file_name) {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };

            for (line_number, code) in production_lines(&content) {
                if predicate(&code) {
                    violations.push(format!(
                        "{}:{} - {}",
                        path.display(),
                        line_number,
                        code.trim()
                    ));
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_tests() {
        let source = "fn a() {}\n// comment\nlet x = 1; // trailing\n#[cfg(test)]\nfn b() {}\n";
        let lines = production_lines(source);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, 1);
        assert_eq!(lines[1], (3, "let x = 1; ".to_string()));
    }

    #[test]
    fn test_core_sources_found() {
        assert!(!rust_files("widget/core/src").is_empty());
    }
}
