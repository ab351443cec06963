//! Expansion of batch inputs into video files.
//!
//! Each input is one of:
//! - an existing file, taken as is
//! - a directory, expanded to its video files in sorted order
//! - a pattern with `*`/`?` wildcards in the file name component

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::video::is_video_file;

/// Result of expanding batch inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    /// Videos in input order, without duplicates.
    pub videos: Vec<PathBuf>,
    /// Inputs that produced no video.
    pub unmatched: Vec<String>,
}

/// Expand files, directories and wildcard patterns into video paths.
pub fn find_videos<S: AsRef<str>>(inputs: &[S]) -> Discovery {
    let mut discovery = Discovery::default();
    let mut seen = HashSet::new();

    for input in inputs {
        let input = input.as_ref();
        let path = Path::new(input);
        let found = if path.is_file() {
            vec![path.to_path_buf()]
        } else if path.is_dir() {
            list_videos(path)
        } else if has_wildcard(input) {
            expand_pattern(path)
        } else {
            Vec::new()
        };

        if found.is_empty() {
            tracing::warn!("[Batch] No videos found for '{}'", input);
            discovery.unmatched.push(input.to_string());
            continue;
        }
        for video in found {
            if seen.insert(video.clone()) {
                discovery.videos.push(video);
            }
        }
    }

    tracing::debug!(
        "[Batch] {} input(s) expanded to {} video(s)",
        inputs.len(),
        discovery.videos.len()
    );
    discovery
}

/// Sorted video files directly inside `dir`.
pub fn list_videos(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut videos: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_video_file(p))
        .collect();
    videos.sort();
    videos
}

fn has_wildcard(input: &str) -> bool {
    input.contains(['*', '?'])
}

fn expand_pattern(pattern: &Path) -> Vec<PathBuf> {
    let Some(name_pattern) = pattern.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let dir = match pattern.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if has_wildcard(&dir.to_string_lossy()) {
        tracing::warn!("[Batch] Wildcards are only supported in the file name: {}", pattern.display());
        return Vec::new();
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| wildcard_match(name_pattern, n))
        })
        .collect();
    matches.sort();
    matches
}

/// Match `name` against a pattern where `*` is any run of characters and
/// `?` a single character.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
