//! Filesystem corpus gathering (§4.6).
//!
//! Walks each configured root, filters by include/exclude/exclude-name
//! patterns, and returns an ordered [`FileRecord`] list plus aggregate
//! [`ContextStats`]. Never touches the network or the audit sink — the
//! orchestrator is the single source of truth for gather-related audit
//! events.

use std::path::Path;

use glob::Pattern;
use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, OrchestratorError};

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContextStats {
    pub processed_count: usize,
    pub char_count: usize,
    pub line_count: usize,
    pub token_count: i32,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GatherOptions {
    pub paths: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_names: Vec<String>,
}

fn matches_any(patterns: &[Pattern], candidate: &str) -> bool {
    patterns.iter().any(|p| p.matches(candidate))
}

fn compile_patterns(raw: &[String]) -> Vec<Pattern> {
    raw.iter().filter_map(|p| Pattern::new(p).ok()).collect()
}

/// Walks [`GatherOptions::paths`] and returns the surviving files in
/// deterministic, lexicographic-per-root order.
pub struct ContextGatherer;

impl ContextGatherer {
    pub fn gather(
        cancel: &CancellationToken,
        options: &GatherOptions,
    ) -> Result<(Vec<FileRecord>, ContextStats), OrchestratorError> {
        let include = compile_patterns(&options.include);
        let exclude = compile_patterns(&options.exclude);
        let exclude_names = compile_patterns(&options.exclude_names);

        let mut records = Vec::new();
        let mut stats = ContextStats {
            paths: options.paths.clone(),
            ..Default::default()
        };

        for root in &options.paths {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::new(ErrorKind::Cancelled, "gather cancelled"));
            }
            let root_path = Path::new(root);
            let mut entries: Vec<_> = WalkBuilder::new(root_path)
                .hidden(false)
                .build()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
                .collect();
            entries.sort_by(|a, b| a.path().cmp(b.path()));

            for entry in entries {
                let abs_path = entry.path();
                let relative = abs_path.strip_prefix(root_path).unwrap_or(abs_path);
                let relative_str = relative.to_string_lossy().replace('\\', "/");

                if !include.is_empty() && !matches_any(&include, &relative_str) {
                    continue;
                }
                if matches_any(&exclude, &relative_str) {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy();
                if matches_any(&exclude_names, &file_name) {
                    continue;
                }

                let bytes = match std::fs::read(abs_path) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::debug!(path = %abs_path.display(), error = %e, "skipping unreadable file");
                        continue;
                    }
                };
                let content = match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(_) => {
                        tracing::debug!(path = %abs_path.display(), "skipping non-UTF-8 file");
                        continue;
                    }
                };

                stats.char_count += content.chars().count();
                stats.line_count += content.lines().count();
                stats.processed_count += 1;
                records.push(FileRecord { path: relative_str, content });
            }
        }

        stats.token_count = estimate_tokens(&records);
        Ok((records, stats))
    }

    /// Renders a human-readable summary of gathered stats to stdout; used
    /// for `--dry-run`.
    pub fn report_dry_run(stats: &ContextStats) {
        println!("Dry run: gathered {} file(s)", stats.processed_count);
        println!("  paths:        {}", stats.paths.join(", "));
        println!("  characters:   {}", stats.char_count);
        println!("  lines:        {}", stats.line_count);
        println!("  approx tokens:{}", stats.token_count);
    }
}

/// Rough words/4*3 heuristic, consistent with the estimate other model
/// providers document for English prose.
fn estimate_tokens(records: &[FileRecord]) -> i32 {
    let words: usize = records.iter().map(|r| r.content.split_whitespace().count()).sum();
    ((words as f64 / 4.0) * 3.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn gathers_files_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "second").unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();

        let options = GatherOptions {
            paths: vec![dir.path().to_string_lossy().to_string()],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let (records, stats) = ContextGatherer::gather(&cancel, &options).unwrap();

        assert_eq!(records.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(), vec!["a.txt", "b.txt"]);
        assert_eq!(stats.processed_count, 2);
    }

    #[tokio::test]
    async fn exclude_names_filters_by_bare_filename() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("Cargo.lock"), "lockfile").unwrap();

        let options = GatherOptions {
            paths: vec![dir.path().to_string_lossy().to_string()],
            exclude_names: vec!["Cargo.lock".to_string()],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let (records, _) = ContextGatherer::gather(&cancel, &options).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "keep.rs");
    }

    #[tokio::test]
    async fn include_pattern_restricts_to_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "rust").unwrap();
        fs::write(dir.path().join("b.md"), "markdown").unwrap();

        let options = GatherOptions {
            paths: vec![dir.path().to_string_lossy().to_string()],
            include: vec!["*.rs".to_string()],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let (records, _) = ContextGatherer::gather(&cancel, &options).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "a.rs");
    }

    #[tokio::test]
    async fn non_utf8_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("binary.bin"), [0xff, 0xfe, 0x00, 0xff]).unwrap();
        fs::write(dir.path().join("text.txt"), "ok").unwrap();

        let options = GatherOptions {
            paths: vec![dir.path().to_string_lossy().to_string()],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let (records, stats) = ContextGatherer::gather(&cancel, &options).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(stats.processed_count, 1);
    }
}
