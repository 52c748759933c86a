//! Name→id resolution for browsers, browser versions, platforms and devices.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, error, warn};

use crate::event::{ClientIds, LookupKind};
use crate::sanitize::UserAgentInfo;
use crate::store::HitStore;

pub type LookupMap = Arc<HashMap<String, i64>>;

/// Cache of whole lookup tables, keyed by kind.
///
/// Injected into the resolver so tests and deployments can choose the
/// backing store.
#[async_trait]
pub trait LookupCache: Send + Sync + 'static {
    async fn get(&self, kind: LookupKind) -> Option<LookupMap>;
    async fn set(&self, kind: LookupKind, map: LookupMap);
    async fn invalidate(&self, kind: LookupKind);
}

/// In-process [`LookupCache`] with a time-to-live per table.
pub struct MokaLookupCache {
    cache: Cache<LookupKind, LookupMap>,
}

impl MokaLookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(LookupKind::ALL.len() as u64)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl LookupCache for MokaLookupCache {
    async fn get(&self, kind: LookupKind) -> Option<LookupMap> {
        self.cache.get(&kind).await
    }

    async fn set(&self, kind: LookupKind, map: LookupMap) {
        self.cache.insert(kind, map).await;
    }

    async fn invalidate(&self, kind: LookupKind) {
        self.cache.invalidate(&kind).await;
    }
}

pub struct IdentityResolver {
    store: Arc<dyn HitStore>,
    cache: Arc<dyn LookupCache>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn HitStore>, cache: Arc<dyn LookupCache>) -> Self {
        Self { store, cache }
    }

    /// Resolve `name` to its lookup id, creating the row on first sight.
    ///
    /// Empty names are 0 without any lookup. A miss loads the whole table in
    /// one read; a name still absent after that is inserted and the cached
    /// table invalidated. Storage failures degrade to 0.
    pub async fn resolve(&self, kind: LookupKind, name: &str) -> i64 {
        let name = name.trim();
        if name.is_empty() {
            return 0;
        }

        if let Some(map) = self.cache.get(kind).await {
            if let Some(id) = map.get(name) {
                return *id;
            }
        }

        match self.store.load_lookup(kind).await {
            Ok(map) => {
                let map = Arc::new(map);
                self.cache.set(kind, Arc::clone(&map)).await;
                if let Some(id) = map.get(name) {
                    return *id;
                }
            }
            Err(e) => {
                warn!(kind = kind.as_str(), error = %e, "Lookup table load failed");
            }
        }

        match self.store.insert_lookup(kind, name).await {
            Ok(id) => {
                self.cache.invalidate(kind).await;
                debug!(kind = kind.as_str(), name, id, "New lookup value");
                id
            }
            Err(e) => {
                error!(kind = kind.as_str(), name, error = %e, "Lookup insert failed");
                0
            }
        }
    }

    pub async fn resolve_all(&self, ua: &UserAgentInfo) -> ClientIds {
        ClientIds {
            device_id: self.resolve(LookupKind::Device, &ua.device).await,
            browser_id: self.resolve(LookupKind::Browser, &ua.browser).await,
            browser_version_id: self
                .resolve(LookupKind::BrowserVersion, &ua.browser_version)
                .await,
            platform_id: self.resolve(LookupKind::Platform, &ua.platform).await,
        }
    }
}
