//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No blocking I/O inside async functions
//! - No sleep() calls outside frame pacing and reconnect backoff
//!
//! The scanners are line based. They look at the enclosing function of each
//! match and skip everything after the `#[cfg(test)]` marker, where unit
//! tests live.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by the scanners
#[must_use]
pub fn production_dirs() -> Vec<PathBuf> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    vec![
        root.join("paperclip/core/src"),
        root.join("paperclip/daemon/src"),
    ]
}

/// How a function was declared
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `async fn`
    Async,
    /// Plain `fn`
    Sync,
}

/// One source file, split into lines
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// File contents by line
    pub lines: Vec<String>,
    test_start: usize,
}

impl SourceFile {
    /// Read a file; `None` if it cannot be read
    #[must_use]
    pub fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Some(Self::from_source(path, &content))
    }

    /// Wrap in-memory source
    #[must_use]
    pub fn from_source(path: &Path, content: &str) -> Self {
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let test_start = lines
            .iter()
            .position(|l| l.trim().starts_with("#[cfg(test)]"))
            .unwrap_or(lines.len());
        Self {
            path: path.to_path_buf(),
            lines,
            test_start,
        }
    }

    /// Whether a line sits in the unit-test section
    #[must_use]
    pub fn is_test_code(&self, idx: usize) -> bool {
        idx >= self.test_start
    }

    /// Code part of a line, without a trailing `//` comment
    #[must_use]
    pub fn code(&self, idx: usize) -> &str {
        let line = self.lines[idx].as_str();
        line.split("//").next().unwrap_or(line)
    }

    /// Kind of the nearest function declared above `idx`
    ///
    /// `None` at module level.
    #[must_use]
    pub fn enclosing_fn(&self, idx: usize) -> Option<FnKind> {
        for line in self.lines[..=idx].iter().rev() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            if let Some(kind) = fn_declaration(trimmed) {
                return Some(kind);
            }
            if trimmed.starts_with("impl ") || trimmed.starts_with("mod ") {
                return None;
            }
        }
        None
    }

    /// Whether any line within `before` lines above or `after` lines below
    /// `idx` contains one of `words` (case-insensitive)
    #[must_use]
    pub fn context_mentions(&self, idx: usize, before: usize, after: usize, words: &[&str]) -> bool {
        let end = (idx + after + 1).min(self.lines.len());
        self.lines[idx.saturating_sub(before)..end].iter().any(|line| {
            let lower = line.to_lowercase();
            words.iter().any(|w| lower.contains(w))
        })
    }

    /// Format a violation for this line
    #[must_use]
    pub fn violation(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            idx + 1,
            what,
            self.lines[idx].trim()
        )
    }
}

/// Recognise a function declaration, with any visibility or qualifiers
#[must_use]
pub fn fn_declaration(line: &str) -> Option<FnKind> {
    let mut rest = line.trim_start();
    if let Some(after) = rest.strip_prefix("pub") {
        rest = match after.strip_prefix('(') {
            Some(scoped) => scoped.split_once(')').map_or("", |(_, r)| r),
            None => after,
        }
        .trim_start();
    }
    let mut is_async = false;
    loop {
        if let Some(r) = rest.strip_prefix("async ") {
            is_async = true;
            rest = r.trim_start();
            continue;
        }
        match ["const ", "unsafe "].iter().find_map(|q| rest.strip_prefix(q)) {
            Some(r) => rest = r.trim_start(),
            None => break,
        }
    }
    rest.starts_with("fn ").then_some(if is_async {
        FnKind::Async
    } else {
        FnKind::Sync
    })
}

/// All `.rs` files under the production directories
#[must_use]
pub fn production_files() -> Vec<SourceFile> {
    production_dirs()
        .iter()
        .filter(|dir| dir.exists())
        .flat_map(|dir| walkdir::WalkDir::new(dir).into_iter().filter_map(Result::ok))
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|entry| SourceFile::read(entry.path()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_declaration_forms() {
        assert_eq!(fn_declaration("fn main() {"), Some(FnKind::Sync));
        assert_eq!(fn_declaration("    pub fn load(dir: &Path)"), Some(FnKind::Sync));
        assert_eq!(
            fn_declaration("pub(crate) async fn send(&mut self)"),
            Some(FnKind::Async)
        );
        assert_eq!(fn_declaration("pub const fn new() -> Self"), Some(FnKind::Sync));
        assert_eq!(fn_declaration("let f = fn_pointer;"), None);
    }

    #[test]
    fn test_enclosing_function() {
        let file = SourceFile::from_source(
            Path::new("x.rs"),
            "use std::net::SocketAddr;\n\
             impl Foo {\n\
             pub async fn run(&self) {\n\
             let x = 1;\n\
             }\n\
             pub fn load() {\n\
             let y = 2;\n\
             }\n\
             }\n",
        );
        assert_eq!(file.enclosing_fn(0), None);
        assert_eq!(file.enclosing_fn(3), Some(FnKind::Async));
        assert_eq!(file.enclosing_fn(6), Some(FnKind::Sync));
    }

    #[test]
    fn test_unit_test_section() {
        let file = SourceFile::from_source(
            Path::new("x.rs"),
            "fn a() {}\n#[cfg(test)]\nmod tests {}\n",
        );
        assert!(!file.is_test_code(0));
        assert!(file.is_test_code(2));
    }
}
