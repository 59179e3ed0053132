//! # Load Phase
//!
//! Upload of the CSV manifest and the downloaded binary files to object
//! storage. Uploads are idempotent by overwrite, so a rerun replaces
//! rather than duplicates.

pub mod object_store;

pub use object_store::{GsutilStore, ObjectStore};
