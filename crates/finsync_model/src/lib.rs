//! # finsync model
//!
//! Data types shared by every finsync crate.
//!
//! This crate provides:
//! - [`CollectionType`] for the four synchronized entity collections
//! - [`Entity`] with its [`EntityId`] and backend-assigned [`Version`]
//! - [`PushEvent`] and [`Change`] for live deltas, including deletion markers
//! - Channel frames ([`InboundFrame`], [`OutboundFrame`]) and their JSON wire codec
//!
//! This is a pure data crate with no I/O operations. Domain fields of an
//! entity (balances, card status, read flags) are opaque JSON: the sync core
//! stores and replaces them but never interprets them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod entity;
mod error;
mod event;
mod frame;
pub mod wire;

pub use collection::CollectionType;
pub use entity::{Entity, EntityId, Version};
pub use error::{ModelError, ModelResult};
pub use event::{Change, PushEvent};
pub use frame::{Credentials, InboundFrame, OutboundFrame};
