//! Session-scoped access token cache
//!
//! One live token per stream id. Clones share the same map, so the store is
//! passed explicitly to every component that needs guest scope. Nothing here
//! touches disk: the cache ends with the process.

use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{AccessToken, StreamId};

#[derive(Default)]
struct StoreInner {
    tokens: HashMap<StreamId, AccessToken>,
    /// Stream of the most recent guest authorization
    latest: Option<StreamId>,
}

#[derive(Clone, Default)]
pub struct AccessTokenStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl AccessTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a stream, returned unmodified even if past its expiry
    pub fn get(&self, stream_id: &StreamId) -> Option<AccessToken> {
        self.inner.read().tokens.get(stream_id).cloned()
    }

    /// Insert or overwrite the token for `token.stream_id()`
    pub fn put(&self, token: AccessToken) {
        let key = token.stream_id().clone();
        let mut inner = self.inner.write();
        debug!("Storing {} ({})", key.storage_key(), token.redacted());
        inner.latest = Some(key.clone());
        inner.tokens.insert(key, token);
    }

    /// Drop a stream's token, e.g. after the server rejected it
    pub fn clear(&self, stream_id: &StreamId) -> Option<AccessToken> {
        let mut inner = self.inner.write();
        if inner.latest.as_ref() == Some(stream_id) {
            inner.latest = None;
        }
        let removed = inner.tokens.remove(stream_id);
        if removed.is_some() {
            debug!("Cleared {}", stream_id.storage_key());
        }
        removed
    }

    /// Revoke every guest grant held by this session
    pub fn clear_all(&self) {
        let mut inner = self.inner.write();
        inner.tokens.clear();
        inner.latest = None;
    }

    /// Most recent guest authorization still held
    pub fn latest(&self) -> Option<AccessToken> {
        let inner = self.inner.read();
        inner
            .latest
            .as_ref()
            .and_then(|id| inner.tokens.get(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage keys (`stream_token_{id}`) of every held token, sorted
    pub fn storage_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .read()
            .tokens
            .keys()
            .map(StreamId::storage_key)
            .collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for AccessTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenStore")
            .field("keys", &self.storage_keys())
            .finish()
    }
}
