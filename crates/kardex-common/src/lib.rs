//! Kardex common types, errors, and configuration.
//!
//! This crate provides the shared definitions used across all Kardex
//! components.

pub mod config;
pub mod error;
pub mod key;

pub use config::StoreOptions;
pub use error::{Result, StoreError};
pub use key::{KeyDescriptor, KeySegment, SegmentType};
