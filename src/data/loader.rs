//! CSV Data Loader Module
//! Handles batch CSV loading into Polars DataFrames, with encoding detection and chunked reads.

use super::encoding::{Charset, DecodeError, DecodingReader, DetectionError, EncodingDetector, DEFAULT_STEPS};
use super::naming::{NamingError, NamingScheme};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Rows per chunk when streaming large files.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
/// Files at or above this size (MB) are read in chunks.
pub const LARGE_FILE_THRESHOLD_MB: f64 = 100.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const CSV_EXTENSION: &str = "csv";

/// Loaded tables keyed by table name.
pub type TableCollection = BTreeMap<String, DataFrame>;
/// Metadata records keyed by table name.
pub type MetadataMap = BTreeMap<String, TableMetadata>;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Chunk size must be positive")]
    InvalidChunkSize,
    #[error(transparent)]
    Naming(#[from] NamingError),
}

/// Why a single file could not be loaded.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("Decoding failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("Malformed CSV: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("CSV file has no header row")]
    MissingHeader,
    #[error("Malformed CSV: line {line} has {found} fields, header has {expected}")]
    RaggedRow { line: u64, expected: usize, found: usize },
    #[error("Failed to parse CSV: {0}")]
    Polars(#[from] PolarsError),
}

/// Options for a batch load.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub prefix: Option<String>,
    pub suffixes: Option<Vec<String>>,
    pub chunk_size: usize,
    pub collect_metadata: bool,
    pub large_file_threshold_mb: f64,
    pub detection_steps: usize,
    /// Process files sorted by name instead of directory order.
    pub sort_files: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            suffixes: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            collect_metadata: false,
            large_file_threshold_mb: LARGE_FILE_THRESHOLD_MB,
            detection_steps: DEFAULT_STEPS,
            sort_files: true,
        }
    }
}

impl LoaderOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suffixes = Some(suffixes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_metadata(mut self, collect_metadata: bool) -> Self {
        self.collect_metadata = collect_metadata;
        self
    }

    pub fn with_large_file_threshold_mb(mut self, threshold_mb: f64) -> Self {
        self.large_file_threshold_mb = threshold_mb;
        self
    }

    pub fn with_detection_steps(mut self, steps: usize) -> Self {
        self.detection_steps = steps;
        self
    }

    pub fn with_sort_files(mut self, sort_files: bool) -> Self {
        self.sort_files = sort_files;
        self
    }

    fn naming_scheme(&self) -> NamingScheme {
        NamingScheme::new(self.prefix.clone(), self.suffixes.clone())
    }
}

/// Summary of one loaded table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMetadata {
    pub rows: usize,
    pub columns: usize,
    pub columns_list: Vec<String>,
    /// Estimated in-memory size in MB.
    pub memory_size_mb: f64,
    pub file_path: PathBuf,
    pub encoding: Charset,
}

impl TableMetadata {
    pub fn from_frame(df: &DataFrame, file_path: &Path, encoding: Charset) -> Self {
        Self {
            rows: df.height(),
            columns: df.width(),
            columns_list: df
                .get_column_names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            memory_size_mb: df.estimated_size() as f64 / BYTES_PER_MB,
            file_path: file_path.to_path_buf(),
            encoding,
        }
    }
}

/// How a file was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    Whole,
    Chunked { chunks: usize },
}

/// A single successfully loaded file.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub frame: DataFrame,
    pub encoding: Charset,
    pub size_mb: f64,
    pub strategy: LoadStrategy,
}

/// A file skipped during a batch load.
#[derive(Debug)]
pub struct FileFailure {
    pub table_name: String,
    pub path: PathBuf,
    pub error: TableError,
}

/// Everything a batch load produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub tables: TableCollection,
    pub metadata: MetadataMap,
    pub failures: Vec<FileFailure>,
}

impl BatchOutcome {
    pub fn into_parts(self) -> (TableCollection, MetadataMap) {
        (self.tables, self.metadata)
    }
}

/// Loads every CSV file directly inside a directory, one file at a time.
pub struct CsvBatchLoader {
    options: LoaderOptions,
    detector: EncodingDetector,
}

impl Default for CsvBatchLoader {
    fn default() -> Self {
        Self::new(LoaderOptions::default())
    }
}

impl CsvBatchLoader {
    pub fn new(options: LoaderOptions) -> Self {
        let detector = EncodingDetector::new(options.detection_steps);
        Self { options, detector }
    }

    /// CSV files directly inside `dir`, sorted by name unless disabled.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
        let read_dir_error = |source| LoaderError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_dir_error)? {
            let path = entry.map_err(read_dir_error)?.path();
            if path.extension().is_some_and(|ext| ext == CSV_EXTENSION) && path.is_file() {
                files.push(path);
            }
        }

        if self.options.sort_files {
            files.sort();
        }
        Ok(files)
    }

    /// Load every CSV file in `dir`. Per-file failures are logged and collected, never fatal.
    pub fn load(&self, dir: impl AsRef<Path>) -> Result<BatchOutcome, LoaderError> {
        if self.options.chunk_size == 0 {
            return Err(LoaderError::InvalidChunkSize);
        }

        let dir = dir.as_ref();
        let files = self.discover(dir)?;
        let names = self.options.naming_scheme().table_names(&files)?;
        tracing::debug!(dir = %dir.display(), files = files.len(), "discovered CSV files");

        let mut outcome = BatchOutcome::default();
        for (name, path) in names.into_iter().zip(files) {
            match self.load_table(&path) {
                Ok(loaded) => {
                    tracing::info!(
                        table = %name,
                        rows = loaded.frame.height(),
                        columns = loaded.frame.width(),
                        encoding = %loaded.encoding,
                        size_mb = loaded.size_mb,
                        strategy = ?loaded.strategy,
                        "loaded table"
                    );
                    if self.options.collect_metadata {
                        outcome.metadata.insert(
                            name.clone(),
                            TableMetadata::from_frame(&loaded.frame, &path, loaded.encoding),
                        );
                    }
                    outcome.tables.insert(name, loaded.frame);
                }
                Err(error) => {
                    tracing::warn!(table = %name, path = %path.display(), error = %error, "failed to load table");
                    outcome.failures.push(FileFailure {
                        table_name: name,
                        path,
                        error,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Load a single file, choosing the whole or chunked path by size.
    pub fn load_table(&self, path: &Path) -> Result<LoadedTable, TableError> {
        let size_mb = fs::metadata(path)?.len() as f64 / BYTES_PER_MB;
        let encoding = self.detector.detect_path(path)?;

        let (frame, encoding, strategy) = if size_mb < self.options.large_file_threshold_mb {
            let (frame, encoding) = self.read_whole(path, encoding)?;
            (frame, encoding, LoadStrategy::Whole)
        } else {
            let (frame, chunks) = read_chunked(path, encoding, self.options.chunk_size)?;
            (frame, encoding, LoadStrategy::Chunked { chunks })
        };

        Ok(LoadedTable {
            frame,
            encoding,
            size_mb,
            strategy,
        })
    }
}

/// Load every CSV file in `dir` into a table collection plus optional metadata.
pub fn load_csv_batch(
    dir: impl AsRef<Path>,
    prefix: Option<String>,
    suffixes: Option<Vec<String>>,
    chunk_size: usize,
    collect_metadata: bool,
) -> Result<(TableCollection, MetadataMap), LoaderError> {
    let options = LoaderOptions {
        prefix,
        suffixes,
        chunk_size,
        collect_metadata,
        ..LoaderOptions::default()
    };
    Ok(CsvBatchLoader::new(options).load(dir)?.into_parts())
}

fn parse_frame(bytes: Vec<u8>, schema: Option<SchemaRef>) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_schema(schema)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
}

/// Streams CSV records in batches under one row model: blank lines are dropped,
/// short rows are padded with empty fields and long rows are rejected.
struct RecordBatches<R: Read> {
    records: ::csv::Reader<R>,
    headers: ::csv::ByteRecord,
    record: ::csv::ByteRecord,
    emitted: bool,
    exhausted: bool,
}

impl<R: Read> RecordBatches<R> {
    fn new(source: R) -> Result<Self, TableError> {
        let mut records = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);
        let headers = records.byte_headers()?.clone();
        if headers.is_empty() {
            return Err(TableError::MissingHeader);
        }
        Ok(Self {
            records,
            headers,
            record: ::csv::ByteRecord::new(),
            emitted: false,
            exhausted: false,
        })
    }

    /// Up to `limit` records re-serialized as CSV under the header row, with their count.
    /// Always yields at least one batch, so a header-only file keeps its columns.
    fn next_batch(&mut self, limit: usize) -> Result<Option<(Vec<u8>, usize)>, TableError> {
        if self.exhausted {
            return Ok(None);
        }

        let width = self.headers.len();
        let mut writer = ::csv::Writer::from_writer(Vec::new());
        writer.write_byte_record(&self.headers)?;
        let mut rows = 0;
        while rows < limit && self.records.read_byte_record(&mut self.record)? {
            if self.record.len() > width {
                return Err(TableError::RaggedRow {
                    line: self.record.position().map_or(0, |pos| pos.line()),
                    expected: width,
                    found: self.record.len(),
                });
            }
            while self.record.len() < width {
                self.record.push_field(b"");
            }
            writer.write_byte_record(&self.record)?;
            rows += 1;
        }

        if rows < limit {
            self.exhausted = true;
        }
        if rows == 0 && self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        let buffer = writer.into_inner().map_err(|err| err.into_error())?;
        Ok(Some((buffer, rows)))
    }
}

impl RecordBatches<DecodingReader<BufReader<File>>> {
    fn open(path: &Path, encoding: Charset) -> Result<Self, TableError> {
        Self::new(DecodingReader::new(BufReader::new(File::open(path)?), encoding))
    }
}

/// Column type covering two chunks' inferred types, following CSV inference rules.
fn widen(seen: &DataType, found: &DataType) -> DataType {
    match (seen, found) {
        _ if seen == found => seen.clone(),
        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => DataType::Float64,
        _ => DataType::String,
    }
}

/// Schema a single pass over the whole file would infer, computed one chunk at a time.
/// Columns that are entirely null in a chunk say nothing about its type.
fn infer_streamed_schema(path: &Path, encoding: Charset, chunk_size: usize) -> Result<Schema, TableError> {
    let mut batches = RecordBatches::open(path, encoding)?;
    let mut columns: Vec<(PlSmallStr, Option<DataType>)> = Vec::new();

    while let Some((buffer, _)) = batches.next_batch(chunk_size)? {
        let frame = parse_frame(buffer, None)?;
        if columns.is_empty() {
            columns = frame
                .get_columns()
                .iter()
                .map(|column| (column.name().clone(), None))
                .collect();
        }
        for ((_, dtype), column) in columns.iter_mut().zip(frame.get_columns()) {
            if column.null_count() == column.len() {
                continue;
            }
            *dtype = Some(match dtype.take() {
                Some(seen) => widen(&seen, column.dtype()),
                None => column.dtype().clone(),
            });
        }
    }

    let mut schema = Schema::with_capacity(columns.len());
    for (name, dtype) in columns {
        schema.with_column(name, dtype.unwrap_or(DataType::String));
    }
    Ok(schema)
}

impl CsvBatchLoader {
    /// Read `path` in one pass. A sampled UTF-8 guess that the full content contradicts
    /// is re-detected over every byte.
    fn read_whole(&self, path: &Path, encoding: Charset) -> Result<(DataFrame, Charset), TableError> {
        let bytes = fs::read(path)?;
        let (buffer, encoding) = {
            let (text, encoding) = match encoding.decode(&bytes) {
                Ok(text) => (text, encoding),
                Err(err) if encoding == Charset::Utf8 => {
                    let fallback = self.detector.detect_full(&bytes)?;
                    if fallback == Charset::Utf8 {
                        return Err(err.into());
                    }
                    tracing::debug!(path = %path.display(), encoding = %fallback, "sampled UTF-8 guess replaced");
                    (fallback.decode(&bytes)?, fallback)
                }
                Err(err) => return Err(err.into()),
            };
            let (buffer, _) = RecordBatches::new(text.as_bytes())?
                .next_batch(usize::MAX)?
                .unwrap_or_default();
            (buffer, encoding)
        };
        drop(bytes);
        Ok((parse_frame(buffer, None)?, encoding))
    }
}

/// Stream `path` in batches of `chunk_size` records and stack them in file order.
///
/// The schema is settled by a first streaming pass so every chunk parses to the
/// same column types a single pass would produce.
fn read_chunked(path: &Path, encoding: Charset, chunk_size: usize) -> Result<(DataFrame, usize), TableError> {
    let schema: SchemaRef = Arc::new(infer_streamed_schema(path, encoding, chunk_size)?);
    let mut batches = RecordBatches::open(path, encoding)?;
    let mut chunks: Vec<LazyFrame> = Vec::new();

    while let Some((buffer, rows)) = batches.next_batch(chunk_size)? {
        chunks.push(parse_frame(buffer, Some(schema.clone()))?.lazy());
        tracing::trace!(path = %path.display(), chunk = chunks.len(), rows, "parsed chunk");
    }

    let count = chunks.len();
    let frame = concat(
        chunks,
        UnionArgs {
            parallel: false,
            rechunk: true,
            ..Default::default()
        },
    )?
    .collect()?;
    Ok((frame, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    const CRASHES: &str = "\
fecha,municipio,heridos
2023-01-04,Bogotá,2
2023-01-05,Medellín,0
2023-01-07,Cali,1";

    const VEHICLES: &str = "\
placa,tipo
ABC123,moto
XYZ987,bus";

    fn write(dir: &TempDir, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    /// Load `path` once in a single pass and once chunked.
    fn load_both(path: &Path, chunk_size: usize) -> (LoadedTable, LoadedTable) {
        let whole = CsvBatchLoader::default().load_table(path).unwrap();
        let chunked = CsvBatchLoader::new(
            LoaderOptions::default()
                .with_chunk_size(chunk_size)
                .with_large_file_threshold_mb(0.0),
        )
        .load_table(path)
        .unwrap();
        assert_eq!(whole.strategy, LoadStrategy::Whole);
        assert!(matches!(chunked.strategy, LoadStrategy::Chunked { .. }));
        (whole, chunked)
    }

    /// Records the `table` field of every WARN event.
    #[derive(Clone, Default)]
    struct WarnCapture(Arc<Mutex<Vec<String>>>);

    struct TableField(Option<String>);

    impl tracing::field::Visit for TableField {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "table" {
                self.0 = Some(format!("{value:?}"));
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for WarnCapture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                let mut table = TableField(None);
                event.record(&mut table);
                self.0.lock().unwrap().push(table.0.unwrap_or_default());
            }
        }
    }

    fn synthetic_rows(rows: usize) -> String {
        let mut csv = String::from("id,zona,velocidad,gravedad\n");
        for i in 0..rows {
            csv.push_str(&format!("{i},zona_{},{}.5,{}\n", i % 7, i % 120, i % 3));
        }
        csv
    }

    #[test]
    fn test_loads_every_file_keyed_by_stem() {
        let dir = TempDir::new().unwrap();
        write(&dir, "crashes_2023.csv", CRASHES);
        write(&dir, "vehiculos.csv", VEHICLES);
        write(&dir, "notas.txt", "not a table");
        fs::create_dir(dir.path().join("nested")).unwrap();
        write(&dir, "nested/hidden.csv", VEHICLES);

        let (tables, metadata) = load_csv_batch(dir.path(), None, None, DEFAULT_CHUNK_SIZE, false).unwrap();

        assert_eq!(tables.keys().collect::<Vec<_>>(), ["crashes_2023", "vehiculos"]);
        assert_eq!(tables["crashes_2023"].height(), 3);
        assert_eq!(tables["vehiculos"].width(), 2);
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_metadata_matches_frames() {
        let dir = TempDir::new().unwrap();
        let crashes = write(&dir, "crashes.csv", CRASHES);
        write(&dir, "vehiculos.csv", VEHICLES);

        let (tables, metadata) = load_csv_batch(dir.path(), None, None, DEFAULT_CHUNK_SIZE, true).unwrap();

        assert_eq!(metadata.len(), tables.len());
        for (name, df) in &tables {
            let meta = &metadata[name];
            assert_eq!(meta.rows, df.height());
            assert_eq!(meta.columns, df.width());
            let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
            assert_eq!(meta.columns_list, columns);
            assert!(meta.memory_size_mb > 0.0);
        }

        let meta = &metadata["crashes"];
        assert_eq!(meta.columns_list, ["fecha", "municipio", "heridos"]);
        assert_eq!(meta.file_path, crashes);
        assert_eq!(meta.encoding, Charset::Utf8);
    }

    #[test]
    fn test_failures_are_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a_ok.csv", CRASHES);
        write(&dir, "b_ragged.csv", "x,y\n1,2\n3,4,5,6\n");
        write(&dir, "c_binary.csv", (0..400).map(|i| 1 + (i % 8) as u8).collect::<Vec<u8>>());
        write(&dir, "d_ok.csv", VEHICLES);

        let outcome = CsvBatchLoader::new(LoaderOptions::default().with_metadata(true))
            .load(dir.path())
            .unwrap();

        assert_eq!(outcome.tables.keys().collect::<Vec<_>>(), ["a_ok", "d_ok"]);
        assert_eq!(outcome.metadata.len(), 2);

        let failed: Vec<&str> = outcome.failures.iter().map(|f| f.table_name.as_str()).collect();
        assert_eq!(failed, ["b_ragged", "c_binary"]);
        assert!(matches!(
            outcome.failures[0].error,
            TableError::RaggedRow { expected: 2, found: 4, .. }
        ));
        assert!(matches!(outcome.failures[1].error, TableError::Detection(_)));
    }

    #[test]
    fn test_empty_file_is_a_failure() {
        let dir = TempDir::new().unwrap();
        write(&dir, "vacio.csv", "");
        write(&dir, "vehiculos.csv", VEHICLES);

        let outcome = CsvBatchLoader::default().load(dir.path()).unwrap();
        assert_eq!(outcome.tables.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0].error, TableError::MissingHeader));
        assert!(!outcome.metadata.contains_key("b_ragged"));
    }

    #[test]
    fn test_prefix_and_extended_suffixes() {
        let dir = TempDir::new().unwrap();
        for name in ["1.csv", "2.csv", "3.csv", "4.csv"] {
            write(&dir, name, VEHICLES);
        }

        let suffixes = vec!["a".to_string(), "b".to_string()];
        let (tables, metadata) =
            load_csv_batch(dir.path(), Some("acc".into()), Some(suffixes), DEFAULT_CHUNK_SIZE, true).unwrap();

        assert_eq!(
            tables.keys().collect::<Vec<_>>(),
            ["acc_a", "acc_b", "acc_b_1", "acc_b_2"]
        );
        assert_eq!(metadata["acc_b_2"].file_path, dir.path().join("4.csv"));
    }

    #[test]
    fn test_prefix_without_suffixes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "x.csv", VEHICLES);
        write(&dir, "y.csv", CRASHES);

        let (tables, _) = load_csv_batch(dir.path(), Some("acc".into()), None, DEFAULT_CHUNK_SIZE, false).unwrap();
        assert_eq!(tables.keys().collect::<Vec<_>>(), ["acc_0", "acc_1"]);
        assert_eq!(tables["acc_1"].height(), 3);
    }

    #[test]
    fn test_chunked_read_matches_single_pass() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "grande.csv", synthetic_rows(2_500));

        let whole = CsvBatchLoader::default().load_table(&path).unwrap();
        let chunked = CsvBatchLoader::new(
            LoaderOptions::default()
                .with_chunk_size(1_000)
                .with_large_file_threshold_mb(0.0),
        )
        .load_table(&path)
        .unwrap();

        assert_eq!(whole.strategy, LoadStrategy::Whole);
        assert_eq!(chunked.strategy, LoadStrategy::Chunked { chunks: 3 });
        assert_eq!(chunked.frame.height(), 2_500);
        assert_eq!(chunked.frame.get_column_names(), whole.frame.get_column_names());
        assert!(chunked.frame.equals_missing(&whole.frame));
    }

    #[test]
    fn test_blank_lines_are_skipped_on_both_paths() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "huecos.csv", "a,b\n1,2\n\n3,4\n");

        let (whole, chunked) = load_both(&path, 1);
        assert_eq!(whole.frame.height(), 2);
        assert_eq!(chunked.frame.height(), 2);
        assert_eq!(whole.frame.dtypes(), chunked.frame.dtypes());
        assert!(chunked.frame.equals_missing(&whole.frame));
    }

    #[test]
    fn test_short_rows_are_padded_on_both_paths() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "cortas.csv", "a,b,c\n1,2,3\n4,5\n6,7,8\n");

        let (whole, chunked) = load_both(&path, 2);
        assert_eq!(whole.frame.height(), 3);
        assert_eq!(chunked.frame.height(), 3);
        assert_eq!(whole.frame.column("c").unwrap().i64().unwrap().get(1), None);
        assert_eq!(whole.frame.dtypes(), chunked.frame.dtypes());
        assert!(chunked.frame.equals_missing(&whole.frame));
    }

    #[test]
    fn test_all_null_chunk_keeps_column_type() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "nulos.csv", "a,b\n1,10\n2,20\n3,\n4,\n");

        let (whole, chunked) = load_both(&path, 2);
        assert_eq!(chunked.strategy, LoadStrategy::Chunked { chunks: 2 });
        assert_eq!(whole.frame.dtypes(), [DataType::Int64, DataType::Int64]);
        assert_eq!(chunked.frame.dtypes(), whole.frame.dtypes());
        assert!(chunked.frame.equals_missing(&whole.frame));
    }

    #[test]
    fn test_late_type_change_loads_on_both_paths() {
        let dir = TempDir::new().unwrap();
        let mut csv = String::from("id,code\n");
        for i in 0..12_000 {
            if i == 11_000 {
                csv.push_str(&format!("{i},N/A\n"));
            } else {
                csv.push_str(&format!("{i},{}\n", i % 500));
            }
        }
        let path = write(&dir, "codigos.csv", csv);

        let (whole, chunked) = load_both(&path, 5_000);
        assert_eq!(whole.frame.height(), 12_000);
        assert_eq!(whole.frame.column("code").unwrap().dtype(), &DataType::String);
        assert_eq!(chunked.frame.dtypes(), whole.frame.dtypes());
        assert!(chunked.frame.equals_missing(&whole.frame));
    }

    #[test]
    fn test_sampled_utf8_guess_falls_back_to_full_detection() {
        let dir = TempDir::new().unwrap();
        let mut text = String::from("id,ciudad\n");
        for i in 0..100 {
            text.push_str(&format!("{i},Bogota\n"));
        }
        text.push_str("100,Málaga\n");
        for i in 101..1000 {
            text.push_str(&format!("{i},Pasto\n"));
        }
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(&text);
        let path = write(&dir, "ciudades.csv", &*bytes);

        let loaded = CsvBatchLoader::new(LoaderOptions::default().with_detection_steps(2))
            .load_table(&path)
            .unwrap();
        assert_eq!(loaded.encoding, Charset::Windows1252);
        let ciudad = loaded.frame.column("ciudad").unwrap().str().unwrap();
        assert_eq!(ciudad.get(100), Some("Málaga"));
    }

    #[test]
    fn test_one_warning_per_failed_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a_ok.csv", CRASHES);
        write(&dir, "b_ragged.csv", "x,y\n1,2\n3,4,5,6\n");
        write(&dir, "c_binary.csv", (0..400).map(|i| 1 + (i % 8) as u8).collect::<Vec<u8>>());
        write(&dir, "d_ok.csv", VEHICLES);

        let capture = WarnCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let outcome = tracing::subscriber::with_default(subscriber, || {
            CsvBatchLoader::default().load(dir.path()).unwrap()
        });

        let warned = capture.0.lock().unwrap().clone();
        assert_eq!(warned, ["b_ragged", "c_binary"]);
        assert_eq!(outcome.failures.len(), warned.len());
        assert_eq!(outcome.tables.len(), 2);
    }

    #[test]
    fn test_chunked_read_decodes_code_pages() {
        let dir = TempDir::new().unwrap();
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode("ciudad,clima\nMálaga,cálido\nZúrich,frío\n");
        let path = write(&dir, "clima.csv", &*bytes);

        let loaded = CsvBatchLoader::new(
            LoaderOptions::default()
                .with_chunk_size(1)
                .with_large_file_threshold_mb(0.0),
        )
        .load_table(&path)
        .unwrap();

        assert_eq!(loaded.encoding, Charset::Windows1252);
        assert_eq!(loaded.strategy, LoadStrategy::Chunked { chunks: 2 });
        let ciudad = loaded.frame.column("ciudad").unwrap().str().unwrap();
        assert_eq!(ciudad.get(0), Some("Málaga"));
        assert_eq!(ciudad.get(1), Some("Zúrich"));
    }

    #[test]
    fn test_windows_1252_and_bom_files() {
        let dir = TempDir::new().unwrap();
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode("municipio,costo\nCúcuta,€20\nIbagué,€15\n");
        write(&dir, "costos.csv", &*bytes);
        let mut bom = vec![0xEF, 0xBB, 0xBF];
        bom.extend_from_slice("id,ciudad\n1,Bogotá\n".as_bytes());
        write(&dir, "con_bom.csv", bom);

        let (tables, metadata) = load_csv_batch(dir.path(), None, None, DEFAULT_CHUNK_SIZE, true).unwrap();

        assert_eq!(metadata["costos"].encoding, Charset::Windows1252);
        let municipio = tables["costos"].column("municipio").unwrap().str().unwrap();
        assert_eq!(municipio.get(0), Some("Cúcuta"));
        assert_eq!(municipio.get(1), Some("Ibagué"));

        assert_eq!(metadata["con_bom"].encoding, Charset::Utf8);
        assert_eq!(metadata["con_bom"].columns_list, ["id", "ciudad"]);
    }

    #[test]
    fn test_missing_directory_aborts() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no_existe");
        let err = load_csv_batch(&missing, None, None, DEFAULT_CHUNK_SIZE, false).unwrap_err();
        assert!(matches!(err, LoaderError::ReadDir { .. }));
    }

    #[test]
    fn test_invalid_options_rejected_before_loading() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.csv", VEHICLES);
        write(&dir, "b.csv", VEHICLES);

        let zero_chunks = load_csv_batch(dir.path(), None, None, 0, false).unwrap_err();
        assert!(matches!(zero_chunks, LoaderError::InvalidChunkSize));

        let duplicate = CsvBatchLoader::new(LoaderOptions::default().with_prefix("t").with_suffixes(["x", "x"]))
            .load(dir.path())
            .unwrap_err();
        assert!(matches!(duplicate, LoaderError::Naming(NamingError::DuplicateName(_))));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let outcome = CsvBatchLoader::default().load(dir.path()).unwrap();
        assert!(outcome.tables.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
