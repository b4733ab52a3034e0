//! Barcode intake pipeline.
//!
//! Validates scanned codes, looks products up across several third-party
//! databases behind a coalescing cache, optionally cleans the merged record
//! with a language model, and books confirmed scans into an external inventory
//! system through a retrying job queue.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
