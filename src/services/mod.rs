//! Storage services: blob bytes on disk, metadata records, and the file
//! service that coordinates the two.

pub mod blob_store;
pub mod error;
pub mod file_service;
pub mod metadata_store;
