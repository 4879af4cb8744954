//! Core data models for the document gateway.
//!
//! Documents are schemaless JSON objects; the typed records here describe the
//! rows and conventional documents the store layer reads and writes.

pub mod database;
pub mod document;
pub mod file;
