//! File specifications and OS path helpers
//!
//! Thin filesystem plumbing shared by the gate, compressor, and uploader:
//! pattern parsing, wildcard matching, idempotent deletes, trigger files,
//! and archive moves. Paths arriving from scheduler configuration may be
//! Windows-shaped, so everything funnels through [`normalize_path`] first.

use bulkline_common::{BulklineError, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A parsed file location: directory, name pattern, extension.
///
/// The extension is always non-empty after parsing. A pattern lacking an
/// extension is rejected at construction time because downstream stages
/// key their behavior off the extension (new extensions are created
/// during processing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub directory: PathBuf,
    /// File name without extension; may contain one `*` wildcard segment
    pub pattern: String,
    /// Extension including the leading dot, e.g. `.csv`
    pub extension: String,
}

impl FileSpec {
    /// Split a path into directory, name pattern, and extension.
    pub fn parse(path: &str) -> Result<Self> {
        let normalized = normalize_path(path);
        let full = Path::new(&normalized);
        let directory = full.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let filename = full
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        let (pattern, extension) = match filename.rfind('.') {
            Some(dot) if dot > 0 => (filename[..dot].to_string(), filename[dot..].to_string()),
            _ => {
                return Err(BulklineError::invalid_file_spec(path.to_string()));
            },
        };

        Ok(Self {
            directory,
            pattern,
            extension,
        })
    }

    /// Full pattern including the extension, e.g. `orders_*.csv`.
    pub fn file_pattern(&self) -> String {
        format!("{}{}", self.pattern, self.extension)
    }
}

/// Convert a Windows-shaped path to a forward-slash path and trim the
/// trailing blank some schedulers append to avoid escaping a closing quote.
pub fn normalize_path(directory: &str) -> String {
    directory.replace('\\', "/").trim_end().to_string()
}

/// Match a file name against a pattern containing `*` wildcards.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == name;
    }

    let mut rest = name;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with `*`
    true
}

/// Find files in `directory` whose names match `<pattern><extension>`.
///
/// Returns an empty vector when the directory cannot be read; the caller
/// decides whether absence is an error.
pub fn find_files(directory: &Path, pattern: &str, extension: &str) -> Vec<PathBuf> {
    let full_pattern = format!("{}{}", pattern, extension);
    let mut matches = Vec::new();

    let Ok(entries) = std::fs::read_dir(directory) else {
        return matches;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if wildcard_match(&full_pattern, &name) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    matches
}

/// Delete a temporary file. Idempotent: absence is logged, not an error.
pub fn delete_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Deleted temporary file"),
        Err(_) => debug!(path = %path.display(), "Temporary file not found, nothing to delete"),
    }
}

/// Expand `YYYY`/`MM`/`DD`/`HH`/`MI`/`SS`/`FILENAME` placeholders in a
/// filename template against the current local time, stripping any `$`
/// markers the scheduler wraps placeholders in.
pub fn timestamped_filename(template: &str) -> String {
    let now = Local::now();
    let stamp = now.format("%Y%m%d%H%M%S").to_string();

    let stem = template.rfind('.').map_or(template, |dot| &template[..dot]);
    template
        .replace("FILENAME", stem)
        .replace("YYYY", &stamp[..4])
        .replace("MM", &stamp[4..6])
        .replace("DD", &stamp[6..8])
        .replace("HH", &stamp[8..10])
        .replace("MI", &stamp[10..12])
        .replace("SS", &stamp[12..14])
        .replace('$', "")
}

/// Create (or overwrite) a trigger file holding one record with the
/// current timestamp and a row count, separated by `delimiter`.
pub fn create_trigger_file(
    directory: &Path,
    filename_template: &str,
    delimiter: &str,
    row_count: u64,
) -> Result<PathBuf> {
    std::fs::create_dir_all(directory)?;

    let record = format!("{}{}{}", Local::now().to_rfc3339(), delimiter, row_count);
    let filename = timestamped_filename(filename_template).replace("SEQUENCE", "1");
    let path = directory.join(filename.trim());

    std::fs::write(&path, &record)?;
    debug!(path = %path.display(), record = %record, "Trigger file written");
    Ok(path)
}

/// Move files matching `file_pattern` from `source` into `archive`
/// (created on demand), renaming each through the archive template with a
/// per-file sequence number. Returns the number of files moved.
pub fn archive_files(
    file_pattern: &str,
    source: &Path,
    archive: &Path,
    archive_template: &str,
) -> Result<usize> {
    if !archive.exists() {
        debug!(path = %archive.display(), "Archive path not found, creating it");
        std::fs::create_dir_all(archive)?;
    }

    let spec = FileSpec::parse(&format!("{}/{}", source.display(), file_pattern))?;
    let mut sequence = 1;
    for file in find_files(source, &spec.pattern, &spec.extension) {
        let new_name = timestamped_filename(archive_template)
            .replace("SEQUENCE", &sequence.to_string());
        let destination = archive.join(new_name.trim());
        std::fs::rename(&file, &destination)?;
        debug!(from = %file.display(), to = %destination.display(), "Archived file");
        sequence += 1;
    }
    Ok(sequence - 1)
}

/// Delete source files (and their compressed twins) after they have been
/// staged and loaded. Files already moved elsewhere are tolerated.
pub fn delete_source_files(
    file_pattern: &str,
    source: &Path,
    compressed_extension: &str,
) -> Result<usize> {
    let spec = FileSpec::parse(&format!("{}/{}", source.display(), file_pattern))?;
    let compressed_ext = format!(".{}", compressed_extension.trim_start_matches('.'));

    let mut targets = find_files(source, &spec.pattern, &spec.extension);
    targets.extend(find_files(source, &spec.pattern, &compressed_ext));

    let mut deleted = 0;
    for file in targets {
        match std::fs::remove_file(&file) {
            Ok(()) => {
                debug!(path = %file.display(), "Deleted source file");
                deleted += 1;
            },
            Err(_) => debug!(path = %file.display(), "Source file not found"),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_spec_requires_extension() {
        let spec = FileSpec::parse("/data/in/orders_*.csv").unwrap();
        assert_eq!(spec.directory, PathBuf::from("/data/in"));
        assert_eq!(spec.pattern, "orders_*");
        assert_eq!(spec.extension, ".csv");

        assert!(FileSpec::parse("/data/in/orders").is_err());
        assert!(FileSpec::parse("/data/in/.hidden").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("C:\\data\\in "), "C:/data/in");
        assert_eq!(normalize_path("/data/in"), "/data/in");
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("orders_*.csv", "orders_2024.csv"));
        assert!(wildcard_match("orders_*.csv", "orders_.csv"));
        assert!(wildcard_match("*.csv", "anything.csv"));
        assert!(wildcard_match("exact.csv", "exact.csv"));
        assert!(!wildcard_match("orders_*.csv", "invoices_2024.csv"));
        assert!(!wildcard_match("orders_*.csv", "orders_2024.dat"));
    }

    #[test]
    fn test_find_files_missing_dir_is_empty() {
        let found = find_files(Path::new("/no/such/dir"), "orders_*", ".csv");
        assert!(found.is_empty());
    }

    #[test]
    fn test_find_files_matches_pattern() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("orders_1.csv"), "a").unwrap();
        std::fs::write(dir.path().join("orders_2.csv"), "b").unwrap();
        std::fs::write(dir.path().join("invoices_1.csv"), "c").unwrap();

        let found = find_files(dir.path(), "orders_*", ".csv");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_delete_file_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scratch.dat");
        std::fs::write(&path, "x").unwrap();

        delete_file(&path);
        assert!(!path.exists());
        // Second delete of the same path must not panic or error
        delete_file(&path);
    }

    #[test]
    fn test_trigger_file_contents() {
        let dir = TempDir::new().unwrap();
        let path = create_trigger_file(dir.path(), "done_$SEQUENCE$.trg", "|", 42).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("|42"));
        assert!(path.file_name().unwrap().to_string_lossy().contains("done_1"));
    }

    #[test]
    fn test_archive_files_moves_matches() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(src.path().join("orders_1.csv"), "a").unwrap();
        std::fs::write(src.path().join("orders_2.csv"), "b").unwrap();

        let moved =
            archive_files("orders_*.csv", src.path(), dst.path(), "orders_SEQUENCE.csv").unwrap();
        assert_eq!(moved, 2);
        assert!(find_files(src.path(), "orders_*", ".csv").is_empty());
        assert_eq!(find_files(dst.path(), "orders_*", ".csv").len(), 2);
    }

    #[test]
    fn test_delete_source_files_covers_compressed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("orders_1.csv"), "a").unwrap();
        std::fs::write(dir.path().join("orders_1.gz"), "b").unwrap();

        let deleted = delete_source_files("orders_*.csv", dir.path(), "gz").unwrap();
        assert_eq!(deleted, 2);
    }
}
