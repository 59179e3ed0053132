//! # Transform Phase
//!
//! Turns raw joined rows into per-file records: study-level report
//! aggregation and FileKey de-duplication ([`aggregator`]), optional
//! DICOM→JPEG conversion ([`converter`]), and the CSV manifest
//! ([`manifest`]).

pub mod aggregator;
pub mod converter;
pub mod manifest;

pub use aggregator::{ReportAggregation, RowAggregator};
pub use converter::{Dcm2JpgConverter, DicomConverter};
pub use manifest::ManifestWriter;
