//! Bulk fetch abstraction.
//!
//! The engine never talks HTTP directly; it asks a [`FetchGateway`] for the
//! current state of a collection and hands the result to the reconciler.

use crate::error::SyncResult;
use async_trait::async_trait;
use finsync_model::{CollectionType, Entity};
use std::sync::Arc;

/// Parameters forwarded to every bulk fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchParams {
    /// Maximum entities per response, if the backend pages.
    pub page_size: Option<u32>,
    /// Opaque continuation token.
    pub cursor: Option<String>,
}

impl FetchParams {
    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sets the continuation cursor.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Result of one bulk fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    /// Current representations of the returned entities.
    pub entities: Vec<Entity>,
    /// True if `entities` is the complete collection.
    ///
    /// Only exhaustive responses may remove local entities that are
    /// missing from the result.
    pub exhaustive: bool,
}

impl FetchResponse {
    /// A complete listing of the collection.
    pub fn exhaustive(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            exhaustive: true,
        }
    }

    /// A partial listing (one page, or a filtered view).
    pub fn partial(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            exhaustive: false,
        }
    }
}

/// Source of authoritative collection state.
///
/// Implementations return [`crate::SyncError::Network`] for transport
/// failures (with `retryable` set accordingly) and
/// [`crate::SyncError::Auth`] when credentials are refused.
#[async_trait]
pub trait FetchGateway: Send + Sync + 'static {
    /// Fetches the current state of a collection.
    async fn fetch_collection(
        &self,
        collection: CollectionType,
        params: &FetchParams,
    ) -> SyncResult<FetchResponse>;
}

#[async_trait]
impl<T: FetchGateway + ?Sized> FetchGateway for Arc<T> {
    async fn fetch_collection(
        &self,
        collection: CollectionType,
        params: &FetchParams,
    ) -> SyncResult<FetchResponse> {
        (**self).fetch_collection(collection, params).await
    }
}
