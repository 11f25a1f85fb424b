//! EDA Loader - batch CSV loading for exploratory data analysis
//!
//! Loads every CSV file in a directory into Polars DataFrames, detecting each
//! file's text encoding and streaming large files in chunks.

pub mod config;
pub mod data;

pub use config::ProjectPaths;
pub use data::{
    detect_encoding, load_csv_batch, BatchOutcome, Charset, CsvBatchLoader, LoaderError,
    LoaderOptions, MetadataMap, TableCollection, TableMetadata,
};
