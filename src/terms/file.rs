use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::TermSource;

/// Terms written to a freshly created term file.
pub const DEFAULT_TERMS: &[&str] = &["secret", "password", "confidential"];

/// Reads one term per line from a local file.
///
/// A missing file is created with [`DEFAULT_TERMS`]. Blank lines are ignored.
pub struct FileTermSource {
    path: PathBuf,
}

impl FileTermSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn create_default(&self) -> Vec<String> {
        let defaults: Vec<String> = DEFAULT_TERMS.iter().map(|t| t.to_string()).collect();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Could not create {}: {}", parent.display(), e);
            }
        }
        let mut content = defaults.join("\n");
        content.push('\n');
        match tokio::fs::write(&self.path, content).await {
            Ok(()) => info!("Created default term file {}", self.path.display()),
            Err(e) => warn!("Could not write default term file {}: {}", self.path.display(), e),
        }
        defaults
    }
}

#[async_trait::async_trait]
impl TermSource for FileTermSource {
    async fn get_terms(&self) -> Vec<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_terms(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.create_default().await,
            Err(e) => {
                error!("Failed to read term file {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Split file content into unique, trimmed, non-blank terms (first occurrence wins).
pub fn parse_terms(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

/// Append `term` to the term file unless it is already present.
///
/// Returns `true` if the term was added.
pub fn append_term(path: &Path, term: &str) -> crate::error::Result<bool> {
    let term = term.trim();
    if term.is_empty() {
        return Ok(false);
    }
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if parse_terms(&existing).iter().any(|t| t == term) {
        return Ok(false);
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", term)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blank_lines_and_duplicates() {
        let terms = parse_terms("alpha\n\n  beta  \nalpha\r\n\t\n");
        assert_eq!(terms, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "project-x\nacme corp\n").unwrap();

        let terms = FileTermSource::new(&path).get_terms().await;
        assert_eq!(terms, vec!["project-x", "acme corp"]);
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("terms.txt");

        let terms = FileTermSource::new(&path).get_terms().await;
        assert_eq!(terms, DEFAULT_TERMS);
        assert!(path.exists());
        assert_eq!(parse_terms(&std::fs::read_to_string(&path).unwrap()), DEFAULT_TERMS);
    }

    #[tokio::test]
    async fn unreadable_path_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        let terms = FileTermSource::new(dir.path()).get_terms().await;
        assert!(terms.is_empty());
    }

    #[test]
    fn append_term_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "alpha").unwrap();

        assert!(append_term(&path, "beta").unwrap());
        assert!(!append_term(&path, "beta").unwrap());
        assert!(!append_term(&path, "alpha").unwrap());
        assert_eq!(
            parse_terms(&std::fs::read_to_string(&path).unwrap()),
            vec!["alpha", "beta"]
        );
    }
}
