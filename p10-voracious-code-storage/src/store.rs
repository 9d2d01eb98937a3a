//! In-memory revision store: one append-only revision history per file
//! path, with directory listing derived from the set of known paths.

use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("illegal file name")]
    Illegal,
}

/// Validates and normalizes a Voracious Code Storage path: must start
/// with `/`, every segment non-empty and made of
/// `[A-Za-z0-9_.+/-]` only, no `.` or `..` segments.
pub fn validate_path(path: &str) -> Result<(), PathError> {
    if !path.starts_with('/') {
        return Err(PathError::Illegal);
    }

    let segments: Vec<&str> = path.split('/').skip(1).collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(PathError::Illegal);
    }

    let valid_char = |c: char| c.is_ascii_alphanumeric() || "_.+-".contains(c);
    if segments.iter().any(|s| !s.chars().all(valid_char)) {
        return Err(PathError::Illegal);
    }

    Ok(())
}

/// A file's content must be valid text: printable ASCII plus tab,
/// newline, and carriage return.
pub fn is_text(data: &[u8]) -> bool {
    data.iter().all(|&b| matches!(b, 0x09 | 0x0a | 0x0d | 0x20..=0x7e))
}

#[derive(Debug, Default)]
pub struct Store {
    files: BTreeMap<String, Vec<Vec<u8>>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Entry {
    File { name: String, revision: usize },
    Dir { name: String },
}

impl Store {
    /// Appends `data` as a new revision of `path`, unless it is
    /// byte-identical to the current latest revision. Returns the
    /// revision number the path now has.
    pub fn put(&mut self, path: &str, data: Vec<u8>) -> usize {
        let revisions = self.files.entry(path.to_string()).or_default();

        if revisions.last() != Some(&data) {
            revisions.push(data);
        }

        revisions.len()
    }

    #[must_use]
    pub fn get(&self, path: &str, revision: Option<usize>) -> Option<&[u8]> {
        let revisions = self.files.get(path)?;
        let index = match revision {
            Some(r) if r >= 1 => r - 1,
            Some(_) => return None,
            None => revisions.len().checked_sub(1)?,
        };
        revisions.get(index).map(Vec::as_slice)
    }

    /// Lists the immediate children of `dir` (files with their latest
    /// revision, and subdirectories), sorted by name.
    #[must_use]
    pub fn list(&self, dir: &str) -> Vec<Entry> {
        let prefix = if dir.ends_with('/') { dir.to_string() } else { format!("{dir}/") };

        let mut files = Vec::new();
        let mut dirs = std::collections::BTreeSet::new();

        for path in self.files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else { continue };
            match rest.split_once('/') {
                Some((child_dir, _)) => {
                    dirs.insert(child_dir.to_string());
                }
                None => {
                    let revision = self.files[path].len();
                    files.push(Entry::File { name: rest.to_string(), revision });
                }
            }
        }

        let mut entries: Vec<Entry> = dirs.into_iter().map(|name| Entry::Dir { name }).collect();
        entries.extend(files);
        entries.sort_by(|a, b| name_of(a).cmp(name_of(b)));
        entries
    }
}

fn name_of(entry: &Entry) -> &str {
    match entry {
        Entry::File { name, .. } | Entry::Dir { name } => name,
    }
}
