//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep to wait for events.
//! **Exceptions**: frame pacing in the playback loops (`scheduler.rs`,
//! `server.rs`), the reconnect backoff of the pixel sink, and test code.
//! Deadline waits use `sleep_until` and are not matched.

use architectural_enforcement::{production_files, SourceFile};

/// Files whose job is pacing frames in real time
const PACING_FILES: &[&str] = &["scheduler.rs", "server.rs"];

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<String> = production_files().iter().flat_map(check_file).collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Frame pacing in the scheduler and session loops");
        eprintln!("  - Reconnect backoff in the pixel sink");
        eprintln!("  - Test code");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn check_file(file: &SourceFile) -> Vec<String> {
    let pacing_file = PACING_FILES.iter().any(|name| file.path.ends_with(name));
    let mut violations = Vec::new();

    for idx in 0..file.lines.len() {
        if file.is_test_code(idx) {
            continue;
        }
        let code = file.code(idx);
        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }
        if pacing_file && file.context_mentions(idx, 10, 2, &["frame", "pacing"]) {
            continue;
        }
        if file.context_mentions(idx, 15, 5, &["reconnect", "backoff", "retry"]) {
            continue;
        }
        violations.push(file.violation(idx, "Sleep"));
    }
    violations
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_sleep_violation_detection() {
        let file = SourceFile::from_source(
            Path::new("poll.rs"),
            "async fn wait_ready() {\n    loop {\n        tokio::time::sleep(Duration::from_millis(10)).await;\n    }\n}\n",
        );
        assert_eq!(check_file(&file).len(), 1);
    }

    #[test]
    fn test_backoff_allowed() {
        let file = SourceFile::from_source(
            Path::new("pixel.rs"),
            "async fn send() {\n    while !connected {\n        // Reconnect backoff\n        tokio::time::sleep(backoff).await;\n    }\n}\n",
        );
        assert!(check_file(&file).is_empty());
    }

    #[test]
    fn test_frame_pacing_only_in_pacing_files() {
        let source = "/// Frame pacing\nasync fn pace() {\n    tokio::time::sleep(d).await;\n}\n";
        let paced = SourceFile::from_source(Path::new("src/scheduler.rs"), source);
        assert!(check_file(&paced).is_empty());

        let elsewhere = SourceFile::from_source(Path::new("src/render.rs"), source);
        assert_eq!(check_file(&elsewhere).len(), 1);
    }
}
