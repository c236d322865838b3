//! Raw text datasets.
//!
//! Sources are either JSONL (one object per line, text under a configurable
//! field) or Parquet (a configurable string column). Empty lines and null
//! cells are skipped; every other row becomes one sample, in file order.

use arrow::array::{Array as ArrowArray, LargeStringArray, StringArray};
use packshard_core::{DatasetConfig, PackShardError, Result, SourceFormat};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

fn dataset_err(msg: impl Into<String>) -> PackShardError {
    PackShardError::Dataset(msg.into())
}

/// In-memory text corpus addressed by sample index.
#[derive(Debug, Clone, Default)]
pub struct TextDataset {
    texts: Vec<String>,
}

impl TextDataset {
    /// Wrap already-loaded texts.
    pub fn from_texts(texts: Vec<String>) -> Self {
        Self { texts }
    }

    /// Load the dataset described by `config`.
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let format = match config.format {
            SourceFormat::Auto => detect_format(&config.path)?,
            other => other,
        };

        let mut texts = match format {
            SourceFormat::Parquet => load_parquet_text(&config.path, &config.text_column)?,
            _ => load_jsonl_text(&config.path, &config.text_column)?,
        };
        if let Some(max) = config.max_samples {
            texts.truncate(max);
        }

        tracing::info!(
            path = %config.path.display(),
            samples = texts.len(),
            "loaded dataset"
        );
        Ok(Self { texts })
    }

    /// Get the number of samples.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Check if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Samples `[start, end)`, clamped to the dataset.
    pub fn slice(&self, start: usize, end: usize) -> &[String] {
        let end = end.min(self.texts.len());
        &self.texts[start.min(end)..end]
    }

    /// Get all samples.
    pub fn texts(&self) -> &[String] {
        &self.texts
    }
}

/// Pick the reader from the file extension.
pub fn detect_format(path: &Path) -> Result<SourceFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") | Some("pq") => Ok(SourceFormat::Parquet),
        Some("jsonl") | Some("json") | Some("ndjson") => Ok(SourceFormat::Jsonl),
        _ => Err(dataset_err(format!(
            "cannot infer dataset format from {}; set dataset.format",
            path.display()
        ))),
    }
}

/// Load the `field` string of every JSONL record.
pub fn load_jsonl_text<P: AsRef<Path>>(path: P, field: &str) -> Result<Vec<String>> {
    let file = File::open(path.as_ref()).map_err(|e| {
        PackShardError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open dataset file {}: {}", path.as_ref().display(), e),
        ))
    })?;

    let reader = BufReader::new(file);
    let mut texts = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| dataset_err(format!("line {}: invalid JSON: {}", line_num + 1, e)))?;
        match value.get(field) {
            Some(serde_json::Value::String(text)) => texts.push(text.clone()),
            Some(serde_json::Value::Null) => continue,
            Some(_) => {
                return Err(dataset_err(format!(
                    "line {}: field '{}' is not a string",
                    line_num + 1,
                    field
                )))
            }
            None => {
                return Err(dataset_err(format!(
                    "line {}: missing field '{}'",
                    line_num + 1,
                    field
                )))
            }
        }
    }

    Ok(texts)
}

/// Load a string column from a Parquet file.
pub fn load_parquet_text<P: AsRef<Path>>(path: P, text_column: &str) -> Result<Vec<String>> {
    let file = File::open(path.as_ref()).map_err(|e| {
        PackShardError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open Parquet file {}: {}", path.as_ref().display(), e),
        ))
    })?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| dataset_err(format!("Failed to create Parquet reader: {}", e)))?;

    let schema = builder.schema();
    let text_idx = schema.index_of(text_column).map_err(|_| {
        dataset_err(format!(
            "Column '{}' not found in Parquet file. Available columns: {:?}",
            text_column,
            schema.fields().iter().map(|f| f.name()).collect::<Vec<_>>()
        ))
    })?;

    let reader = builder
        .build()
        .map_err(|e| dataset_err(format!("Failed to build Parquet reader: {}", e)))?;

    let mut texts = Vec::new();
    for batch_result in reader {
        let batch =
            batch_result.map_err(|e| dataset_err(format!("Failed to read Parquet batch: {}", e)))?;
        let column = batch.column(text_idx);

        if let Some(array) = column.as_any().downcast_ref::<StringArray>() {
            texts.extend(array.iter().flatten().map(str::to_string));
        } else if let Some(array) = column.as_any().downcast_ref::<LargeStringArray>() {
            texts.extend(array.iter().flatten().map(str::to_string));
        } else {
            return Err(dataset_err(format!(
                "Column '{}' is not a string type",
                text_column
            )));
        }
    }

    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_parquet(path: &Path, column: &str, values: &[Option<&str>]) {
        use arrow::array::StringBuilder;
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::arrow_writer::ArrowWriter;
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(vec![Field::new(column, DataType::Utf8, true)]));
        let mut builder = StringBuilder::new();
        for value in values {
            match value {
                Some(v) => builder.append_value(v),
                None => builder.append_null(),
            }
        }
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(builder.finish())]).unwrap();

        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_jsonl_loading() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"text": "first", "url": "a"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"text": null}}"#).unwrap();
        writeln!(file, r#"{{"text": "second"}}"#).unwrap();

        let config = DatasetConfig {
            path: file.path().to_path_buf(),
            ..Default::default()
        };
        let dataset = TextDataset::load(&config).unwrap();
        assert_eq!(dataset.texts(), &["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_jsonl_custom_field_and_cap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..5 {
            writeln!(file, r#"{{"content": "doc {i}"}}"#).unwrap();
        }

        let config = DatasetConfig {
            path: file.path().to_path_buf(),
            format: SourceFormat::Jsonl,
            text_column: "content".into(),
            max_samples: Some(3),
        };
        let dataset = TextDataset::load(&config).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.slice(2, 10), &["doc 2".to_string()]);
        assert!(dataset.slice(7, 9).is_empty());
    }

    #[test]
    fn test_jsonl_missing_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"body": "x"}}"#).unwrap();

        let err = load_jsonl_text(file.path(), "text").unwrap_err();
        assert!(err.to_string().contains("missing field 'text'"), "{err}");
    }

    #[test]
    fn test_parquet_loading() {
        let file = tempfile::Builder::new().suffix(".parquet").tempfile().unwrap();
        write_parquet(file.path(), "text", &[Some("Hello world"), None, Some("Third sample")]);

        let config = DatasetConfig {
            path: file.path().to_path_buf(),
            ..Default::default()
        };
        let dataset = TextDataset::load(&config).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.texts()[0], "Hello world");
        assert_eq!(dataset.texts()[1], "Third sample");
    }

    #[test]
    fn test_parquet_missing_column() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_parquet(file.path(), "content", &[Some("Test content")]);

        let result = load_parquet_text(file.path(), "text");
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains("not found"),
            "Error should mention column not found: {}",
            err
        );
    }

    #[test]
    fn test_unknown_extension() {
        assert!(detect_format(Path::new("corpus.txt")).is_err());
        assert_eq!(detect_format(Path::new("c4.jsonl")).unwrap(), SourceFormat::Jsonl);
        assert_eq!(detect_format(Path::new("c4.parquet")).unwrap(), SourceFormat::Parquet);
    }
}
