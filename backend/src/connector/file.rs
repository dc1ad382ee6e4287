// File Connector
//
// Reads every file in a directory whose name matches a glob, in sorted order.
// JSON files hold one object per line; Avro files are object container files
// carrying their writer schema. Each sink instance writes its own part files.

use apache_avro::types::Value as AvroValue;
use apache_avro::{Reader, Schema, Writer};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::projector::{Payload, RowProjector};
use super::{
    avro, declared_side_fields, json, option_or, required_option, side_table_fields, EntryMetadata,
    MetadataResolver, QueryTargetDescriptor, UpsertTargetDescriptor, OPTION_GLOB, OPTION_PATH,
};
use crate::api::middleware::AppError;
use crate::engine::expression::matches_pattern;
use crate::engine::{SinkProcessor, SourcePoll, SourceProcessor};
use crate::models::{MappingField, MappingOptions, Row, TableField};

/// Regular files in `dir` matching `glob`, sorted by name
pub fn list_files(dir: &Path, glob: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if matches_pattern(&entry.file_name().to_string_lossy(), glob, '*', '?') {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn location(options: &MappingOptions) -> Result<(PathBuf, &str), AppError> {
    let path = required_option(options, OPTION_PATH)?;
    Ok((PathBuf::from(path), option_or(options, OPTION_GLOB, "*")))
}

pub struct FileAvroResolver;

impl MetadataResolver for FileAvroResolver {
    fn resolve_fields(
        &self,
        is_key: bool,
        user_fields: &[MappingField],
        options: &MappingOptions,
        _mapping_name: &str,
    ) -> Result<Vec<MappingField>, AppError> {
        if !user_fields.is_empty() {
            return declared_side_fields(is_key, user_fields);
        }
        let (dir, glob) = location(options)?;
        let no_data = || AppError::Resolution(format!("No data found in '{}/{}'", dir.display(), glob));

        let first = list_files(&dir, glob)
            .map_err(|_| no_data())?
            .into_iter()
            .next()
            .ok_or_else(no_data)?;
        let reader = Reader::new(BufReader::new(File::open(&first)?))?;
        tracing::debug!("Sampled Avro schema from {}", first.display());
        avro::fields_from_schema(reader.writer_schema())
    }

    fn resolve_metadata(
        &self,
        is_key: bool,
        fields: &[MappingField],
        _options: &MappingOptions,
    ) -> Result<EntryMetadata, AppError> {
        let fields = side_table_fields(is_key, fields)?;
        let schema = avro::write_schema(&fields);
        Ok(EntryMetadata {
            fields,
            query_target: QueryTargetDescriptor::Avro,
            upsert_target: UpsertTargetDescriptor::Avro { schema },
        })
    }
}

pub struct FileJsonResolver;

impl MetadataResolver for FileJsonResolver {
    fn resolve_fields(
        &self,
        is_key: bool,
        user_fields: &[MappingField],
        options: &MappingOptions,
        _mapping_name: &str,
    ) -> Result<Vec<MappingField>, AppError> {
        if !user_fields.is_empty() {
            return declared_side_fields(is_key, user_fields);
        }
        let (dir, glob) = location(options)?;
        let source = dir.display().to_string();
        let no_data = || AppError::Resolution(format!("No data found in '{}'", source));

        for file in list_files(&dir, glob).map_err(|_| no_data())? {
            for line in BufReader::new(File::open(&file)?).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let sample = json::parse_sample(&line, &source)?;
                tracing::debug!("Sampled JSON line from {}", file.display());
                return json::infer_fields(&sample, None);
            }
        }
        Err(no_data())
    }

    fn resolve_metadata(
        &self,
        is_key: bool,
        fields: &[MappingField],
        _options: &MappingOptions,
    ) -> Result<EntryMetadata, AppError> {
        Ok(EntryMetadata {
            fields: side_table_fields(is_key, fields)?,
            query_target: QueryTargetDescriptor::Json,
            upsert_target: UpsertTargetDescriptor::Json,
        })
    }
}

pub struct FileJsonSource {
    files: VecDeque<PathBuf>,
    lines: Option<Lines<BufReader<File>>>,
    projector: RowProjector,
}

impl FileJsonSource {
    pub fn open(path: &str, glob: &str, projector: RowProjector) -> Result<Self, AppError> {
        Ok(Self {
            files: list_files(Path::new(path), glob)?.into(),
            lines: None,
            projector,
        })
    }
}

impl SourceProcessor for FileJsonSource {
    fn poll(&mut self) -> Result<SourcePoll, AppError> {
        loop {
            if let Some(lines) = &mut self.lines {
                match lines.next() {
                    Some(line) => {
                        let line = line?;
                        if line.trim().is_empty() {
                            continue;
                        }
                        let document: serde_json::Value = serde_json::from_str(&line)?;
                        if let Some(row) = self.projector.project(&Payload::Absent, &Payload::Json(&document))? {
                            return Ok(SourcePoll::Row(row));
                        }
                        continue;
                    }
                    None => self.lines = None,
                }
            }
            match self.files.pop_front() {
                Some(file) => self.lines = Some(BufReader::new(File::open(file)?).lines()),
                None => return Ok(SourcePoll::Done),
            }
        }
    }
}

pub struct FileAvroSource {
    files: VecDeque<PathBuf>,
    reader: Option<Reader<'static, BufReader<File>>>,
    projector: RowProjector,
}

impl FileAvroSource {
    pub fn open(path: &str, glob: &str, projector: RowProjector) -> Result<Self, AppError> {
        Ok(Self {
            files: list_files(Path::new(path), glob)?.into(),
            reader: None,
            projector,
        })
    }
}

impl SourceProcessor for FileAvroSource {
    fn poll(&mut self) -> Result<SourcePoll, AppError> {
        loop {
            if let Some(reader) = &mut self.reader {
                match reader.next() {
                    Some(record) => {
                        let record = record?;
                        if let Some(row) = self.projector.project(&Payload::Absent, &Payload::Avro(&record))? {
                            return Ok(SourcePoll::Row(row));
                        }
                        continue;
                    }
                    None => self.reader = None,
                }
            }
            match self.files.pop_front() {
                Some(file) => self.reader = Some(Reader::new(BufReader::new(File::open(file)?))?),
                None => return Ok(SourcePoll::Done),
            }
        }
    }
}

fn part_file(dir: &str, extension: &str) -> Result<PathBuf, AppError> {
    fs::create_dir_all(dir)?;
    Ok(Path::new(dir).join(format!("part-{}.{}", Uuid::new_v4(), extension)))
}

pub struct FileJsonSink {
    writer: BufWriter<File>,
    fields: Vec<TableField>,
}

impl FileJsonSink {
    pub fn open(dir: &str, fields: Vec<TableField>) -> Result<Self, AppError> {
        let file = part_file(dir, "json")?;
        tracing::debug!("Writing JSON lines to {}", file.display());
        Ok(Self {
            writer: BufWriter::new(File::create(file)?),
            fields,
        })
    }
}

#[async_trait]
impl SinkProcessor for FileJsonSink {
    async fn write(&mut self, row: Row) -> Result<(), AppError> {
        let document = json::to_object(self.fields.iter().zip(row.iter()));
        serde_json::to_writer(&mut self.writer, &document)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AppError> {
        self.writer.flush()?;
        Ok(())
    }

    async fn complete(&mut self, _outcome: &Result<(), AppError>) -> Result<(), AppError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Records held in memory before a container is rolled
const AVRO_RECORDS_PER_PART: usize = 4096;

/// Buffers records and writes them out as a new container file on every
/// flush. A container is self-contained, so each flush rolls a part file.
pub struct FileAvroSink {
    dir: String,
    schema: Arc<Schema>,
    fields: Vec<TableField>,
    records: Vec<AvroValue>,
}

impl FileAvroSink {
    pub fn open(dir: &str, schema: &str, fields: Vec<TableField>) -> Result<Self, AppError> {
        Ok(Self {
            dir: dir.to_string(),
            schema: avro::parse_schema(schema)?,
            fields,
            records: Vec::new(),
        })
    }

    fn roll(&mut self) -> Result<(), AppError> {
        if self.records.is_empty() {
            return Ok(());
        }
        let mut writer = Writer::new(&self.schema, Vec::new());
        let count = self.records.len();
        for record in self.records.drain(..) {
            writer.append(record)?;
        }
        let bytes = writer.into_inner()?;
        let file = part_file(&self.dir, "avro")?;
        fs::write(&file, bytes)?;
        tracing::debug!("Wrote {} records to Avro container {}", count, file.display());
        Ok(())
    }
}

#[async_trait]
impl SinkProcessor for FileAvroSink {
    async fn write(&mut self, row: Row) -> Result<(), AppError> {
        self.records.push(avro::to_record(self.fields.iter().zip(row.iter()))?);
        if self.records.len() >= AVRO_RECORDS_PER_PART {
            self.roll()?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AppError> {
        self.roll()
    }

    /// Rows accepted by `write` are kept whatever the outcome; a cancelled
    /// streaming job still leaves everything it processed.
    async fn complete(&mut self, _outcome: &Result<(), AppError>) -> Result<(), AppError> {
        self.roll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Expression;
    use crate::models::{QueryPath, ScalarType, Value};
    use tempfile::tempdir;

    fn options(dir: &Path, extra: &[(&str, &str)]) -> MappingOptions {
        let mut options = MappingOptions::new();
        options.insert(OPTION_PATH.to_string(), dir.display().to_string());
        for (k, v) in extra {
            options.insert(k.to_string(), v.to_string());
        }
        options
    }

    fn drain(source: &mut dyn SourceProcessor) -> Vec<Row> {
        let mut rows = Vec::new();
        while let SourcePoll::Row(row) = source.poll().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_sorted_glob_enumeration() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "").unwrap();
        fs::write(dir.path().join("a.json"), "").unwrap();
        fs::write(dir.path().join("c.txt"), "").unwrap();

        let files = list_files(dir.path(), "*.json").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_json_sampling_uses_first_line() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.json"), "\n{\"id\": 1, \"name\": \"x\"}\n{\"other\": true}\n").unwrap();

        let fields = FileJsonResolver
            .resolve_fields(false, &[], &options(dir.path(), &[]), "f")
            .unwrap();
        assert_eq!(
            fields,
            vec![
                MappingField::new("id", ScalarType::BigInt),
                MappingField::new("name", ScalarType::Varchar),
            ]
        );
    }

    #[test]
    fn test_no_data_found() {
        let dir = tempdir().unwrap();
        let err = FileJsonResolver
            .resolve_fields(false, &[], &options(dir.path(), &[]), "f")
            .unwrap_err();
        assert!(err.to_string().contains("No data found in"));

        let err = FileAvroResolver
            .resolve_fields(false, &[], &options(dir.path(), &[("glob", "*.avro")]), "f")
            .unwrap_err();
        assert!(err.to_string().contains("No data found in"));
        assert!(err.to_string().contains("*.avro"));
    }

    #[tokio::test]
    async fn test_avro_sink_then_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().display().to_string();
        let fields = vec![
            TableField::new("id", ScalarType::Integer, QueryPath::new(false, Some("id".into()))),
            TableField::new("name", ScalarType::Varchar, QueryPath::new(false, Some("name".into()))),
        ];
        let schema = avro::write_schema(&fields);

        let mut sink = FileAvroSink::open(&path, &schema, fields.clone()).unwrap();
        sink.write(vec![Value::Integer(1), Value::Varchar("a".into())]).await.unwrap();
        sink.write(vec![Value::Integer(2), Value::Null]).await.unwrap();
        sink.complete(&Ok(())).await.unwrap();

        // The written file is self-describing
        let sampled = FileAvroResolver
            .resolve_fields(false, &[], &options(dir.path(), &[]), "f")
            .unwrap();
        assert_eq!(
            sampled,
            vec![
                MappingField::new("id", ScalarType::Integer),
                MappingField::new("name", ScalarType::Varchar),
            ]
        );

        let projection = vec![Expression::column(1, ScalarType::Varchar)];
        let mut source = FileAvroSource::open(&path, "*", RowProjector::new(fields, None, projection)).unwrap();
        assert_eq!(drain(&mut source), vec![vec![Value::Varchar("a".into())], vec![Value::Null]]);
    }

    fn avro_record_count(dir: &Path) -> usize {
        list_files(dir, "*.avro")
            .unwrap()
            .into_iter()
            .map(|file| Reader::new(BufReader::new(File::open(file).unwrap())).unwrap().count())
            .sum()
    }

    #[tokio::test]
    async fn test_avro_sink_flush_and_cancel_keep_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().display().to_string();
        let fields = vec![TableField::new("id", ScalarType::BigInt, QueryPath::new(false, Some("id".into())))];
        let schema = avro::write_schema(&fields);

        let mut sink = FileAvroSink::open(&path, &schema, fields).unwrap();
        sink.write(vec![Value::BigInt(1)]).await.unwrap();
        sink.write(vec![Value::BigInt(2)]).await.unwrap();
        assert_eq!(avro_record_count(dir.path()), 0);

        sink.flush().await.unwrap();
        assert_eq!(avro_record_count(dir.path()), 2);
        // Nothing buffered, nothing rolled
        sink.flush().await.unwrap();
        assert_eq!(list_files(dir.path(), "*.avro").unwrap().len(), 1);

        sink.write(vec![Value::BigInt(3)]).await.unwrap();
        sink.complete(&Err(AppError::Internal("Job cancelled".into()))).await.unwrap();
        assert_eq!(avro_record_count(dir.path()), 3);
        assert_eq!(list_files(dir.path(), "*.avro").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_avro_sink_rolls_full_parts() {
        let dir = tempdir().unwrap();
        let path = dir.path().display().to_string();
        let fields = vec![TableField::new("id", ScalarType::BigInt, QueryPath::new(false, Some("id".into())))];
        let schema = avro::write_schema(&fields);

        let mut sink = FileAvroSink::open(&path, &schema, fields).unwrap();
        for id in 0..AVRO_RECORDS_PER_PART as i64 + 1 {
            sink.write(vec![Value::BigInt(id)]).await.unwrap();
        }
        assert_eq!(avro_record_count(dir.path()), AVRO_RECORDS_PER_PART);
        sink.complete(&Ok(())).await.unwrap();
        assert_eq!(avro_record_count(dir.path()), AVRO_RECORDS_PER_PART + 1);
    }

    #[tokio::test]
    async fn test_json_sink_then_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").display().to_string();
        let fields = vec![TableField::new("n", ScalarType::BigInt, QueryPath::new(false, Some("n".into())))];

        let mut sink = FileJsonSink::open(&path, fields.clone()).unwrap();
        sink.write(vec![Value::BigInt(3)]).await.unwrap();
        sink.complete(&Ok(())).await.unwrap();

        let projection = vec![Expression::column(0, ScalarType::BigInt)];
        let mut source = FileJsonSource::open(&path, "*.json", RowProjector::new(fields, None, projection)).unwrap();
        assert_eq!(drain(&mut source), vec![vec![Value::BigInt(3)]]);
    }
}
