use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::FlowResult;

/// Metadata of one stored object, as reported by a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    /// Full object key.
    pub key: String,
    /// Storage-level last-modified time.
    pub last_modified: DateTime<Utc>,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects in this page, in key order.
    pub objects: Vec<ObjectMeta>,
    /// Continuation token for the next page, if the listing is not exhausted.
    pub next_token: Option<String>,
}

/// Write-once object storage keyed by path.
///
/// Holds normalized batches, the watermark object and staging artifacts.
/// Implementations should treat `put` as create-or-replace and `delete` of a
/// missing key as success, since cleanup is best-effort and may run twice.
pub trait ObjectStore: Send + Sync {
    /// Writes an object under the given key.
    fn put(&self, key: &str, data: Vec<u8>) -> impl Future<Output = FlowResult<()>> + Send;

    /// Reads an object, returning [`None`] when the key does not exist.
    fn get(&self, key: &str) -> impl Future<Output = FlowResult<Option<Vec<u8>>>> + Send;

    /// Lists one page of objects under a prefix.
    ///
    /// Pass the previous page's `next_token` to continue; `None` starts from
    /// the beginning. Listings can span arbitrarily many objects, so callers
    /// must loop on the token instead of assuming a single page.
    fn list(
        &self,
        prefix: &str,
        token: Option<String>,
    ) -> impl Future<Output = FlowResult<ObjectPage>> + Send;

    /// Deletes an object. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = FlowResult<()>> + Send;
}

/// Denormalized attributes of a reference customer entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomerProfile {
    /// Customer display name.
    pub name: String,
    /// Geographic region the customer belongs to.
    pub region: String,
}

/// Point-lookup-by-key interface over the reference entity store.
///
/// Used solely for enrichment; absent entries are non-fatal and yield default
/// attributes at the call site.
pub trait ReferenceStore: Send + Sync {
    /// Looks up a customer by id, returning [`None`] when absent.
    fn lookup_customer(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = FlowResult<Option<CustomerProfile>>> + Send;
}
