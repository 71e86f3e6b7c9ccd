//! # finsync testkit
//!
//! Test utilities for finsync.
//!
//! This crate provides:
//! - Entity fixtures and fast test configurations
//! - [`MockGateway`]: a scriptable bulk fetch backend
//! - [`ScriptedTransport`] and [`ServerHandle`]: an in-memory push endpoint
//!   driven step by step from the test
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use finsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn receives_pushed_wallet() {
//!     let transport = ScriptedTransport::accepting();
//!     let engine = SyncEngine::new(test_config(), MockGateway::new(), MemoryCache::new(), transport.clone());
//!     engine.start(credentials()).await.unwrap();
//!
//!     let mut server = transport.next_server().await;
//!     server.handshake(1).await;
//!     server.upsert(CollectionType::Wallets, wallet("w-1", 1, "10.00"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod gateway;
pub mod generators;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::gateway::*;
    pub use crate::generators::*;
    pub use crate::transport::*;
}

pub use fixtures::*;
pub use gateway::*;
pub use generators::*;
pub use transport::*;
