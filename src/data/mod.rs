//! Data module - CSV discovery, encoding detection and loading

mod encoding;
mod loader;
mod naming;

pub use encoding::{
    detect_encoding, Charset, DecodeError, DecodingReader, DetectionError, EncodingDetector,
    UnknownCharset, DEFAULT_STEPS,
};
pub use loader::{
    load_csv_batch, BatchOutcome, CsvBatchLoader, FileFailure, LoadStrategy, LoadedTable,
    LoaderError, LoaderOptions, MetadataMap, TableCollection, TableError, TableMetadata,
    DEFAULT_CHUNK_SIZE, LARGE_FILE_THRESHOLD_MB,
};
pub use naming::{extend_suffixes, NamingError, NamingScheme};
