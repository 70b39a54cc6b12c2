use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::FlowResult;
use crate::store::base::{CustomerProfile, ObjectMeta, ObjectPage, ObjectStore, ReferenceStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    writes: Vec<(String, Vec<u8>)>,
    page_size: usize,
}

/// In-memory object store for testing and development purposes.
///
/// Objects are kept in key order so listings behave like a real bucket.
/// The store records every written key in an append-only write log, which
/// tests use to inspect staging artifacts that the pipeline deletes before
/// returning.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectStore {
    /// Creates an empty store with a large single-page listing.
    pub fn new() -> Self {
        Self::with_page_size(1_000)
    }

    /// Creates an empty store that paginates listings at `page_size` objects,
    /// letting tests exercise the continuation-token loop.
    pub fn with_page_size(page_size: usize) -> Self {
        let inner = Inner {
            objects: BTreeMap::new(),
            writes: Vec::new(),
            page_size: page_size.max(1),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Inserts an object with an explicit last-modified time, bypassing the
    /// write log. Used to seed batches "already present" before a run.
    pub async fn insert_with_timestamp(
        &self,
        key: &str,
        data: Vec<u8>,
        last_modified: DateTime<Utc>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified,
            },
        );
    }

    /// Returns the stored bytes for a key, if present.
    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner.objects.get(key).map(|object| object.data.clone())
    }

    /// Returns all keys currently present, in order.
    pub async fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.objects.keys().cloned().collect()
    }

    /// Returns every key ever written through [`ObjectStore::put`], in write
    /// order, including objects that were deleted afterwards.
    pub async fn write_log(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.writes.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Returns every write through [`ObjectStore::put`] with its payload, in
    /// write order. Lets tests inspect staging artifacts the pipeline deletes
    /// before returning.
    pub async fn writes(&self) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.lock().await;
        inner.writes.clone()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> FlowResult<()> {
        let mut inner = self.inner.lock().await;
        inner.writes.push((key.to_string(), data.clone()));
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );

        Ok(())
    }

    async fn get(&self, key: &str) -> FlowResult<Option<Vec<u8>>> {
        let inner = self.inner.lock().await;
        Ok(inner.objects.get(key).map(|object| object.data.clone()))
    }

    async fn list(&self, prefix: &str, token: Option<String>) -> FlowResult<ObjectPage> {
        let inner = self.inner.lock().await;

        let objects: Vec<ObjectMeta> = inner
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| match &token {
                Some(token) => key.as_str() > token.as_str(),
                None => true,
            })
            .take(inner.page_size)
            .map(|(key, object)| ObjectMeta {
                key: key.clone(),
                last_modified: object.last_modified,
            })
            .collect();

        let next_token = if objects.len() == inner.page_size {
            objects.last().map(|meta| meta.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn delete(&self, key: &str) -> FlowResult<()> {
        let mut inner = self.inner.lock().await;
        inner.objects.remove(key);

        Ok(())
    }
}

/// In-memory reference entity store for testing and development purposes.
#[derive(Debug, Clone, Default)]
pub struct MemoryReferenceStore {
    customers: Arc<Mutex<HashMap<String, CustomerProfile>>>,
}

impl MemoryReferenceStore {
    /// Creates an empty reference store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a customer profile under the given id.
    pub async fn insert_customer(&self, customer_id: &str, name: &str, region: &str) {
        let mut customers = self.customers.lock().await;
        customers.insert(
            customer_id.to_string(),
            CustomerProfile {
                name: name.to_string(),
                region: region.to_string(),
            },
        );
    }
}

impl ReferenceStore for MemoryReferenceStore {
    async fn lookup_customer(&self, customer_id: &str) -> FlowResult<Option<CustomerProfile>> {
        let customers = self.customers.lock().await;
        Ok(customers.get(customer_id).cloned())
    }
}
