//! Delimited raw file to parquet conversion
//!
//! Shared by both extraction backends and by the folder compressor. Raw
//! files use control characters as field delimiter and quote sentinel,
//! chosen because they cannot appear in ordinary text data. No header row
//! is assumed; column names are auto-generated during schema inference.
//!
//! Timestamps are coerced to microsecond precision on the way out because
//! the warehouse target does not support nanoseconds; truncation is
//! tolerated, never an error.

use arrow::array::RecordBatch;
use arrow::compute::cast;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use bulkline_common::{BulklineError, Result};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Field delimiter for raw extraction files (DC2). Does not occur in
/// end-user data.
pub const FIELD_DELIMITER: u8 = 0x12;

/// Quote sentinel for raw extraction files (DC1).
pub const QUOTE_SENTINEL: u8 = 0x11;

/// Bytes sampled from the head of a raw file for encoding detection.
const ENCODING_SAMPLE_BYTES: usize = 1024;

/// How many rows schema inference reads before settling on column types.
const SCHEMA_INFERENCE_ROWS: usize = 1000;

/// Detect the text encoding of a raw file by sampling its first 1024
/// bytes. Different source drivers emit different encodings, so the
/// ODBC-tool backend cannot assume one up front.
pub fn detect_encoding(path: &Path) -> Result<&'static encoding_rs::Encoding> {
    let mut file = File::open(path)?;
    let mut sample = vec![0u8; ENCODING_SAMPLE_BYTES];
    let read = file.read(&mut sample)?;
    sample.truncate(read);

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(&sample, read < ENCODING_SAMPLE_BYTES);
    let encoding = detector.guess(None, true);
    debug!(path = %path.display(), encoding = encoding.name(), "Detected raw file encoding");
    Ok(encoding)
}

/// Convert a control-character-delimited raw file into a parquet file.
///
/// `encoding_label` selects the raw file's character set: `None` means
/// the bytes are already UTF-8 clean, `Some("auto")` samples the file,
/// and any other label is resolved by name. Returns the number of rows
/// written.
pub fn delimited_to_parquet(
    input: &Path,
    output: &Path,
    encoding_label: Option<&str>,
) -> Result<u64> {
    let encoding = match encoding_label {
        None => None,
        Some(label) if label.eq_ignore_ascii_case("auto") => Some(detect_encoding(input)?),
        Some(label) => Some(
            encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(|| {
                BulklineError::convert(format!("Unknown character encoding: {}", label))
            })?,
        ),
    };

    let mut raw = Vec::new();
    File::open(input)?.read_to_end(&mut raw)?;

    let utf8: Vec<u8> = match encoding {
        Some(encoding) if encoding != encoding_rs::UTF_8 => {
            let (decoded, _, _) = encoding.decode(&raw);
            decoded.into_owned().into_bytes()
        },
        _ => raw,
    };

    let format = Format::default()
        .with_header(false)
        .with_delimiter(FIELD_DELIMITER)
        .with_quote(QUOTE_SENTINEL);

    let (schema, _) = format
        .infer_schema(Cursor::new(&utf8), Some(SCHEMA_INFERENCE_ROWS))
        .map_err(|e| BulklineError::convert(format!("Schema inference failed: {}", e)))?;
    let target_schema = Arc::new(coerce_timestamps_us(&schema));

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(Cursor::new(&utf8))
        .map_err(|e| BulklineError::convert(format!("CSV reader failed: {}", e)))?;

    let mut writer = ArrowWriter::try_new(
        File::create(output)?,
        target_schema.clone(),
        Some(WriterProperties::builder().build()),
    )
    .map_err(|e| BulklineError::convert(format!("Parquet writer failed: {}", e)))?;

    let mut rows = 0u64;
    for batch in reader {
        let batch = batch.map_err(|e| BulklineError::convert(format!("Row parse failed: {}", e)))?;
        let batch = coerce_batch(&batch, &target_schema)?;
        rows += batch.num_rows() as u64;
        writer
            .write(&batch)
            .map_err(|e| BulklineError::convert(format!("Parquet write failed: {}", e)))?;
    }
    writer
        .close()
        .map_err(|e| BulklineError::convert(format!("Parquet close failed: {}", e)))?;

    debug!(
        input = %input.display(),
        output = %output.display(),
        rows,
        "Converted raw file to parquet"
    );
    Ok(rows)
}

/// Rewrite any sub-microsecond timestamp columns to microsecond precision.
fn coerce_timestamps_us(schema: &Schema) -> Schema {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| match field.data_type() {
            DataType::Timestamp(TimeUnit::Nanosecond, tz) => Field::new(
                field.name(),
                DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
                field.is_nullable(),
            ),
            _ => field.as_ref().clone(),
        })
        .collect();
    Schema::new(fields)
}

/// Cast a batch's columns to the coerced schema; truncation of nanosecond
/// fractions is expected and tolerated.
fn coerce_batch(batch: &RecordBatch, target: &Arc<Schema>) -> Result<RecordBatch> {
    if batch.schema().fields() == target.fields() {
        return Ok(batch.clone());
    }
    let columns = batch
        .columns()
        .iter()
        .zip(target.fields())
        .map(|(column, field)| {
            cast(column, field.data_type())
                .map_err(|e| BulklineError::convert(format!("Timestamp coercion failed: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(target.clone(), columns)
        .map_err(|e| BulklineError::convert(format!("Batch rebuild failed: {}", e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    fn write_raw(dir: &Path, name: &str, rows: &[&[&str]]) -> std::path::PathBuf {
        let path = dir.join(name);
        let delim = FIELD_DELIMITER as char;
        let body: Vec<String> = rows
            .iter()
            .map(|row| row.join(&delim.to_string()))
            .collect();
        std::fs::write(&path, body.join("\n")).unwrap();
        path
    }

    fn parquet_row_count(path: &Path) -> u64 {
        let file = File::open(path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        reader.map(|b| b.unwrap().num_rows() as u64).sum()
    }

    #[test]
    fn test_row_count_round_trip() {
        let dir = TempDir::new().unwrap();
        let input = write_raw(
            dir.path(),
            "orders.dat",
            &[
                &["1", "widget", "2.50"],
                &["2", "gadget", "10.00"],
                &["3", "sprocket", "0.99"],
            ],
        );
        let output = dir.path().join("orders.parquet");

        let rows = delimited_to_parquet(&input, &output, None).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(parquet_row_count(&output), 3);
    }

    #[test]
    fn test_timestamps_are_coerced_to_microseconds() {
        let dir = TempDir::new().unwrap();
        let input = write_raw(
            dir.path(),
            "events.dat",
            &[
                &["1", "2024-05-01T10:00:00.123456789"],
                &["2", "2024-05-01T11:30:00.987654321"],
            ],
        );
        let output = dir.path().join("events.parquet");
        delimited_to_parquet(&input, &output, None).unwrap();

        let file = File::open(&output).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        for field in reader.schema().fields() {
            if let DataType::Timestamp(unit, _) = field.data_type() {
                assert_eq!(*unit, TimeUnit::Microsecond);
            }
        }
    }

    #[test]
    fn test_named_encoding_is_decoded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin.dat");
        // "caf\xe9" in latin-1
        let delim = FIELD_DELIMITER;
        std::fs::write(&path, [b'1', delim, b'c', b'a', b'f', 0xe9]).unwrap();
        let output = dir.path().join("latin.parquet");

        let rows = delimited_to_parquet(&path, &output, Some("windows-1252")).unwrap();
        assert_eq!(rows, 1);
        assert_eq!(parquet_row_count(&output), 1);
    }

    #[test]
    fn test_unknown_encoding_label_errors() {
        let dir = TempDir::new().unwrap();
        let input = write_raw(dir.path(), "x.dat", &[&["1"]]);
        let output = dir.path().join("x.parquet");
        assert!(delimited_to_parquet(&input, &output, Some("not-a-charset")).is_err());
    }

    #[test]
    fn test_detect_encoding_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("utf8.dat");
        std::fs::write(&path, "héllo, wörld").unwrap();
        let encoding = detect_encoding(&path).unwrap();
        assert_eq!(encoding, encoding_rs::UTF_8);
    }
}
