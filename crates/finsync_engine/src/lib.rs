//! # finsync engine
//!
//! Client-side real-time synchronization of financial entities.
//!
//! This crate provides:
//! - [`EntityStore`]: keyed, versioned state per collection with full-snapshot
//!   subscriber fan-out
//! - [`Reconciler`]: merges bulk fetch results and push deltas under the
//!   monotonic-version rule
//! - [`PushChannel`]: one streaming connection with a formal state machine,
//!   heartbeat tracking and jittered exponential reconnect backoff
//! - [`FetchGateway`]: the bulk fetch contract
//! - [`SyncEngine`]: the per-session orchestrator tying everything together
//! - `WebSocketTransport` (feature `websocket`)
//!
//! ## Architecture
//!
//! The engine keeps a local store current from two sources:
//! 1. Bulk fetches, issued at startup, on reconnect, on degradation, on
//!    demand and periodically as a backstop
//! 2. Live push events
//!
//! The snapshot cache seeds the store before any network is available and
//! is superseded by the first authoritative result for each entity.
//!
//! ## Key Invariants
//!
//! - The stored version of an entity never decreases
//! - Stale updates are dropped silently, whatever their arrival order
//! - Only exhaustive fetches delete by omission
//! - Every successful reconnect forces exactly one refresh
//! - A failing subscriber never affects other subscribers or the store
//! - Transient failures surface only as a [`ConnectionState`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod config;
mod driver;
mod engine;
mod error;
mod gateway;
mod reconciler;
mod store;
#[cfg(feature = "websocket")]
mod ws;

pub use channel::{ChannelConfig, ChannelEvent, ConnectionState, PushChannel, PushConnection, PushTransport};
pub use config::{
    Backoff, BackoffConfig, HeartbeatConfig, Jitter, RetryConfig, SyncConfig, DEFAULT_TOMBSTONE_LIMIT,
    MIN_HEARTBEAT_INTERVAL,
};
pub use engine::{EngineState, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use gateway::{FetchGateway, FetchParams, FetchResponse};
pub use reconciler::{ReconcileReport, Reconciler};
pub use store::{ApplyOutcome, EntityStore, RemoveOutcome, Snapshot, StoreReader, Subscription};
#[cfg(feature = "websocket")]
pub use ws::{WebSocketConnection, WebSocketTransport};
