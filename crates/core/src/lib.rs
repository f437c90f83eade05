//! Core types and shared functionality for alexcache.
//!
//! This crate provides:
//! - URL canonicalization into cache keys and file paths
//! - Cache records, collision tracking and index manifests
//! - The SQLite entry store behind the persistent tier
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod key;

pub use cache::{CacheDb, CacheRecord, CollisionResolver};
pub use config::{AppConfig, ConfigError, ExecutionProfile};
pub use error::Error;
pub use key::{CacheKey, CanonicalUrl, UrlCanonicalizer};
