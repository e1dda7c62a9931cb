//! Stream Visibility Gate
//!
//! Picks the read path for list/detail requests. Guest paths attach whatever
//! token the session holds and always get the key-less record; full records
//! are only requested when an operator session is attached to the client.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::types::{Stream, StreamList, StreamView, StreamViewList};
use crate::api::{ApiClient, ApiError, ListQuery};
use crate::auth::{AccessTokenStore, StreamId};

/// Background refresh task. Dropping the handle stops it.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(self) {}
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn ticker(every: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct VisibilityGate {
    api: ApiClient,
    store: AccessTokenStore,
    /// Query behind the listing surfaces currently show
    current: Mutex<Option<ListQuery>>,
    listing: watch::Sender<Option<StreamViewList>>,
}

impl VisibilityGate {
    pub fn new(api: ApiClient, store: AccessTokenStore) -> Self {
        let (listing, _) = watch::channel(None);
        Self {
            api,
            store,
            current: Mutex::new(None),
            listing,
        }
    }

    pub fn store(&self) -> &AccessTokenStore {
        &self.store
    }

    /// Observe every listing this gate fetches, including refreshes
    pub fn subscribe(&self) -> watch::Receiver<Option<StreamViewList>> {
        self.listing.subscribe()
    }

    /// Guest listing.
    ///
    /// With a token in the store the server merges the private streams it
    /// authorises into the same response.
    pub async fn list(&self, query: ListQuery) -> Result<StreamViewList, ApiError> {
        *self.current.lock() = Some(query.clone());
        self.fetch(&query).await
    }

    /// Re-run the current listing, if any. Used after a new grant lands.
    pub async fn refresh(&self) -> Result<Option<StreamViewList>, ApiError> {
        let query = self.current.lock().clone();
        match query {
            Some(query) => self.fetch(&query).await.map(Some),
            None => Ok(None),
        }
    }

    /// Re-run the current listing every `every`, publishing each result to
    /// subscribers, until the handle is dropped
    pub fn poll(self: &Arc<Self>, every: Duration) -> PollHandle {
        let gate = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = ticker(every);
            loop {
                ticker.tick().await;
                let Some(gate) = gate.upgrade() else { break };
                if let Err(e) = gate.refresh().await {
                    warn!("Listing refresh failed: {}", e);
                }
            }
        });
        PollHandle { task }
    }

    /// Re-fetch a guest detail every `every`. Ticks are skipped while the
    /// store holds no token for the stream.
    pub fn follow_detail(
        self: &Arc<Self>,
        id: u64,
        every: Duration,
    ) -> (PollHandle, watch::Receiver<Option<StreamView>>) {
        let (tx, rx) = watch::channel(None);
        let gate = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = ticker(every);
            loop {
                ticker.tick().await;
                let Some(gate) = gate.upgrade() else { break };
                if gate.store.get(&StreamId::Id(id)).is_none() {
                    continue;
                }
                match gate.detail(id).await {
                    Ok(view) => {
                        tx.send_replace(Some(view));
                    }
                    Err(e) => warn!("Detail refresh for stream {} failed: {}", id, e),
                }
            }
        });
        (PollHandle { task }, rx)
    }

    async fn fetch(&self, query: &ListQuery) -> Result<StreamViewList, ApiError> {
        let latest = self.store.latest();
        let token = latest.as_ref().map(|t| t.token());
        let list = self.api.list_stream_views(query, token).await?;
        debug!("Listing returned {} of {} streams", list.streams.len(), list.total);
        self.listing.send_replace(Some(list.clone()));
        Ok(list)
    }

    /// Guest detail by numeric id
    pub async fn detail(&self, id: u64) -> Result<StreamView, ApiError> {
        let stream_id = StreamId::Id(id);
        let token = self.store.get(&stream_id);
        let result = self
            .api
            .stream_view(id, token.as_ref().map(|t| t.token()))
            .await;
        self.forget_rejected(&stream_id, token.is_some(), result)
    }

    /// Guest detail by stream key, for password-unlocked streams
    pub async fn detail_by_key(&self, stream_key: &str) -> Result<StreamView, ApiError> {
        let stream_id = StreamId::Key(stream_key.to_string());
        let token = self.store.get(&stream_id);
        let result = self
            .api
            .stream_view_by_key(stream_key, token.as_ref().map(|t| t.token()))
            .await;
        self.forget_rejected(&stream_id, token.is_some(), result)
    }

    /// A token the server refuses is dropped, never retried silently
    fn forget_rejected<T>(
        &self,
        stream_id: &StreamId,
        had_token: bool,
        result: Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        if let Err(ref err) = result {
            if had_token && matches!(err.status(), Some(401 | 403)) {
                warn!("Server rejected {}, clearing it", stream_id.storage_key());
                self.store.clear(stream_id);
            }
        }
        result
    }

    /// Operator listing with full records
    pub async fn operator_list(&self, query: &ListQuery) -> Result<StreamList<Stream>, ApiError> {
        if !self.api.has_operator() {
            return Err(ApiError::OperatorRequired);
        }
        let list = self.api.list_streams(query).await?;
        info!("Operator listing returned {} streams", list.streams.len());
        Ok(list)
    }

    /// Operator detail with full record
    pub async fn operator_detail(&self, stream_key: &str) -> Result<Stream, ApiError> {
        if !self.api.has_operator() {
            return Err(ApiError::OperatorRequired);
        }
        self.api.stream(stream_key).await
    }
}
