use std::fs;
use std::path::{Path, PathBuf};

use chrono::TimeZone;
use rayon::prelude::*;
use tracing::debug;
use walkdir::WalkDir;

use crate::parser::parse_line;
use crate::rates::RateBook;
use crate::types::UsageEntry;

/// XDG base directory kind, determining which env var and fallback to use.
enum XdgBase {
    /// Uses XDG_CONFIG_HOME, falls back to ~/.config
    Config,
    /// Direct ~/.<name> path
    Home,
}

struct HomeFallback {
    base: XdgBase,
    subpaths: &'static [&'static str],
}

const CLAUDE_FALLBACKS: &[HomeFallback] = &[
    HomeFallback {
        base: XdgBase::Config,
        subpaths: &["claude", "projects"],
    },
    HomeFallback {
        base: XdgBase::Home,
        subpaths: &[".claude", "projects"],
    },
];

/// Default usage-log roots.
///
/// `CLAUDE_CONFIG_DIR` (comma separated) wins when set; otherwise the XDG
/// config location and `~/.claude`, each joined with `projects`.
pub fn default_roots() -> Vec<PathBuf> {
    if let Ok(val) = std::env::var("CLAUDE_CONFIG_DIR") {
        let roots: Vec<PathBuf> = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| PathBuf::from(s).join("projects"))
            .collect();
        if !roots.is_empty() {
            return roots;
        }
    }

    let home = match std::env::var_os("HOME").map(PathBuf::from) {
        Some(h) => h,
        None => return Vec::new(),
    };

    CLAUDE_FALLBACKS
        .iter()
        .map(|fb| {
            let base = match fb.base {
                XdgBase::Config => std::env::var("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| home.join(".config")),
                XdgBase::Home => home.clone(),
            };
            fb.subpaths.iter().fold(base, |path, seg| path.join(seg))
        })
        .collect()
}

/// All files under `roots` with the given extension. Missing roots and
/// unreadable directory entries are skipped.
pub fn discover_files(roots: &[PathBuf], extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for root in roots {
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == extension)
            {
                files.push(entry.into_path());
            }
        }
    }

    files
}

/// Entries from one JSONL file. A file that cannot be read, or is not valid
/// UTF-8, contributes nothing.
pub fn parse_file<Tz>(path: &Path, tz: &Tz, rates: &RateBook) -> Vec<UsageEntry>
where
    Tz: TimeZone,
{
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable log");
            return Vec::new();
        }
    };

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_line(line, tz, rates))
        .collect()
}

/// Parse every `.jsonl` file under `roots` and return the entries sorted by
/// timestamp.
pub fn load_entries<Tz>(roots: &[PathBuf], tz: &Tz, rates: &RateBook) -> Vec<UsageEntry>
where
    Tz: TimeZone + Sync,
{
    let files = discover_files(roots, "jsonl");

    let mut entries: Vec<UsageEntry> = files
        .par_iter()
        .flat_map_iter(|path| parse_file(path, tz, rates))
        .collect();

    entries.sort_by_key(|e| e.timestamp);
    debug!(files = files.len(), entries = entries.len(), "loaded usage logs");
    entries
}
