//! Core library for reconciling guild roster spreadsheet uploads.

pub mod config;
pub mod error;
pub mod export;
pub mod extraction;
pub mod file_utils;
pub mod merge;
pub mod models;
pub mod reconcile;
pub mod screenshot;
pub mod store;
pub mod upload;

pub use config::RosterConfig;
pub use error::{Result, RosterError};
pub use store::{DocumentStore, MemoryStore, SqliteStore};
pub use upload::Uploader;
