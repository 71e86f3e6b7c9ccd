//! # finsync storage
//!
//! Snapshot cache adapters for finsync.
//!
//! The cache holds the last known snapshot of each collection so a cold
//! start can render something before the network answers. Adapters are
//! **pure key/value stores**: one entity list per collection type, no merge
//! logic, no version reasoning. Everything they return is provisional and
//! is superseded by any fetch or push result.
//!
//! ## Available Adapters
//!
//! - [`MemoryCache`] - For tests and sessions without durable storage
//! - [`FileCache`] - One CBOR file per collection in a directory
//!
//! ## Example
//!
//! ```rust
//! use finsync_model::{CollectionType, Entity};
//! use finsync_storage::{CacheStore, MemoryCache};
//!
//! # tokio_test_block_on(async {
//! let cache = MemoryCache::new();
//! let wallets = vec![Entity::new("w-1", 1, serde_json::Value::Null)];
//! cache.save(CollectionType::Wallets, &wallets).await.unwrap();
//! assert_eq!(cache.load(CollectionType::Wallets).await.unwrap(), wallets);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod error;
mod file;
mod memory;

pub use cache::CacheStore;
pub use error::{CacheError, CacheResult};
pub use file::{FileCache, SnapshotInfo, CACHE_SCHEMA_VERSION};
pub use memory::MemoryCache;
