//! Concurrent folder compression
//!
//! Partitions the files matching a pattern into fixed-size batches and
//! converts/compresses each batch's files in parallel. Workers receive
//! owned values only and share no mutable state, so one file's failure
//! cannot corrupt a sibling's output; results are collected after each
//! batch completes. Batches themselves run sequentially to bound the
//! number of in-flight workers.

use crate::convert::delimited_to_parquet;
use crate::files::{find_files, normalize_path, FileSpec};
use bulkline_common::{BulklineError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How a file is rewritten. Values outside the known set are an explicit
/// no-op, logged rather than treated as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressMethod {
    /// Byte-stream compression to `<name>.gz`
    Gzip,
    /// Delimited-text parse and columnar rewrite to `<name>.parquet`
    Parquet,
    /// Unrecognized method: leave files untouched
    None(String),
}

impl CompressMethod {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "gzip" => CompressMethod::Gzip,
            "parquet" => CompressMethod::Parquet,
            other => CompressMethod::None(other.to_string()),
        }
    }
}

/// Outcome of one folder compression run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompressSummary {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Compress every file in `directory` matching `file_pattern`, in batches
/// of `batch_size` (the last batch may be short). Files within a batch
/// run on parallel workers; a failed file is logged and does not abort
/// its siblings.
pub async fn compress_folder(
    directory: &str,
    file_pattern: &str,
    method: CompressMethod,
    batch_size: usize,
) -> Result<CompressSummary> {
    if let CompressMethod::None(ref name) = method {
        debug!(method = %name, "No recognized compression method specified, leaving files as-is");
        return Ok(CompressSummary::default());
    }

    let directory = normalize_path(directory);
    let spec = FileSpec::parse(&format!("{}/{}", directory, file_pattern))?;
    let files = find_files(Path::new(&directory), &spec.pattern, &spec.extension);
    let batch_size = batch_size.max(1);

    let mut summary = CompressSummary::default();
    for batch in files.chunks(batch_size) {
        summary.batches += 1;

        let workers: Vec<_> = batch
            .iter()
            .map(|file| {
                // Owned inputs only: the worker must not borrow driver state.
                let file = file.to_path_buf();
                let method = method.clone();
                tokio::task::spawn_blocking(move || compress_file(&file, &method))
            })
            .collect();

        for (worker, file) in workers.into_iter().zip(batch) {
            match worker.await {
                Ok(Ok(())) => summary.succeeded += 1,
                Ok(Err(e)) => {
                    summary.failed += 1;
                    warn!(file = %file.display(), error = %e, "File compression failed");
                },
                Err(e) => {
                    summary.failed += 1;
                    warn!(file = %file.display(), error = %e, "Compression worker panicked");
                },
            }
        }
    }

    debug!(
        batches = summary.batches,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Folder compression finished"
    );
    Ok(summary)
}

/// Compress or convert a single file next to its input.
pub fn compress_file(path: &Path, method: &CompressMethod) -> Result<()> {
    match method {
        CompressMethod::Gzip => gzip_file(path),
        CompressMethod::Parquet => {
            let output = path.with_extension("parquet");
            delimited_to_parquet(path, &output, None)?;
            Ok(())
        },
        CompressMethod::None(name) => {
            debug!(method = %name, "No compression method specified, skipping file");
            Ok(())
        },
    }
}

fn gzip_file(path: &Path) -> Result<()> {
    let compressed_path: PathBuf = {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    };

    let mut input = std::fs::File::open(path)?;
    let output = std::fs::File::create(&compressed_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder
        .finish()
        .map_err(|e| BulklineError::convert(format!("Gzip finish failed: {}", e)))?;

    debug!(
        input = %path.display(),
        output = %compressed_path.display(),
        "Compressed file"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::convert::FIELD_DELIMITER;
    use tempfile::TempDir;

    fn write_delimited(dir: &Path, name: &str, rows: usize) {
        let delim = FIELD_DELIMITER as char;
        let body: Vec<String> = (0..rows)
            .map(|i| format!("{}{}row{}", i, delim, i))
            .collect();
        std::fs::write(dir.join(name), body.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn test_five_files_batch_of_two_is_three_batches() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_delimited(dir.path(), &format!("part_{}.dat", i), 3);
        }

        let summary = compress_folder(
            &dir.path().to_string_lossy(),
            "part_*.dat",
            CompressMethod::Gzip,
            2,
        )
        .await
        .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        for i in 0..5 {
            assert!(dir.path().join(format!("part_{}.dat.gz", i)).exists());
        }
    }

    #[tokio::test]
    async fn test_malformed_file_does_not_abort_batch_siblings() {
        let dir = TempDir::new().unwrap();
        write_delimited(dir.path(), "part_0.dat", 3);
        write_delimited(dir.path(), "part_1.dat", 3);
        // Batch 2: one malformed file (ragged row arity), one well-formed.
        let delim = FIELD_DELIMITER as char;
        std::fs::write(
            dir.path().join("part_2.dat"),
            format!("1{}a\n2{}b{}extra{}more", delim, delim, delim, delim),
        )
        .unwrap();
        write_delimited(dir.path(), "part_3.dat", 3);

        let summary = compress_folder(
            &dir.path().to_string_lossy(),
            "part_*.dat",
            CompressMethod::Parquet,
            2,
        )
        .await
        .unwrap();

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 3);
        // The well-formed sibling in the failing batch still produced output.
        assert!(dir.path().join("part_3.parquet").exists());
    }

    #[tokio::test]
    async fn test_unknown_method_is_a_logged_noop() {
        let dir = TempDir::new().unwrap();
        write_delimited(dir.path(), "part_0.dat", 1);

        let summary = compress_folder(
            &dir.path().to_string_lossy(),
            "part_*.dat",
            CompressMethod::parse("7zip"),
            2,
        )
        .await
        .unwrap();

        assert_eq!(summary, CompressSummary::default());
        assert!(!dir.path().join("part_0.dat.gz").exists());
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(CompressMethod::parse("GZIP"), CompressMethod::Gzip);
        assert_eq!(CompressMethod::parse(" parquet "), CompressMethod::Parquet);
        assert_eq!(
            CompressMethod::parse("lz4"),
            CompressMethod::None("lz4".to_string())
        );
    }
}
