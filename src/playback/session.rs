//! Negotiation Session
//!
//! Per-viewing-attempt state machine:
//!
//! ```text
//! idle ──start──> connecting ──first track──> playing <──pause/resume──> paused
//!                     │                          │
//!                     └──── failure ───> error <─┘ (failed / disconnected)
//! any ──stop──> idle          idle / error ──start──> connecting
//! ```
//!
//! Every start or stop bumps a generation counter. Callbacks carry the
//! generation of the transport that registered them and are ignored once it
//! is stale, so a closed handle can never move the session.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;

use super::signaling::SignalingEndpoint;
use super::transport::{MediaTransport, TrackInfo, TransportFactory, TransportState};
use super::{PlaybackError, PlaybackStatus};
use crate::auth::StreamId;
use crate::config::PlaybackConfig;

/// Local presentation toggles; no effect on negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    pub muted: bool,
    pub fullscreen: bool,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            muted: true,
            fullscreen: false,
        }
    }
}

struct Inner {
    status: PlaybackStatus,
    last_error: Option<PlaybackError>,
    generation: u64,
    transport: Option<Arc<dyn MediaTransport>>,
    presentation: Presentation,
}

struct Shared {
    id: String,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<PlaybackStatus>,
}

impl Shared {
    fn set_status(&self, inner: &mut Inner, status: PlaybackStatus) {
        if inner.status != status {
            debug!("Session {} state change: {} -> {}", self.id, inner.status, status);
            inner.status = status;
            self.status_tx.send_replace(status);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    /// Take ownership of a freshly opened transport unless the attempt was superseded
    fn adopt(&self, generation: u64, transport: Arc<dyn MediaTransport>) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.transport = Some(transport);
        true
    }

    fn fail(&self, generation: u64, error: PlaybackError) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!("Session {} dropping stale failure: {}", self.id, error);
            return;
        }
        warn!("Session {} playback failed: {}", self.id, error);
        inner.last_error = Some(error);
        self.set_status(&mut inner, PlaybackStatus::Error);
    }

    fn track_arrived(&self, generation: u64, track: TrackInfo) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!("Session {} ignoring track from a closed transport", self.id);
            return;
        }
        info!("Session {} received {} track ({})", self.id, track.kind, track.codec);
        if inner.status == PlaybackStatus::Connecting {
            self.set_status(&mut inner, PlaybackStatus::Playing);
        }
    }

    fn connection_changed(&self, generation: u64, state: TransportState) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        debug!("Session {} connection state: {:?}", self.id, state);
        if state.is_lost() && inner.status != PlaybackStatus::Idle {
            let cause = match state {
                TransportState::Failed => "connection failed",
                _ => "connection disconnected",
            };
            warn!("Session {} {}", self.id, cause);
            inner.last_error = Some(PlaybackError::TransportFailed(cause.to_string()));
            self.set_status(&mut inner, PlaybackStatus::Error);
        }
    }

    /// Close and detach the current transport; late callbacks become stale
    fn release(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        if let Some(transport) = inner.transport.take() {
            transport.close();
        }
        self.set_status(&mut inner, PlaybackStatus::Idle);
    }
}

/// One viewing surface's playback session
pub struct NegotiationSession {
    selector: StreamId,
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    signaling: Arc<dyn SignalingEndpoint>,
    retry_delay: Duration,
    gather_timeout: Duration,
}

impl NegotiationSession {
    pub fn new(
        selector: StreamId,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingEndpoint>,
        config: &PlaybackConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(PlaybackStatus::Idle);
        Self {
            selector,
            shared: Arc::new(Shared {
                id: uuid::Uuid::new_v4().to_string(),
                inner: Mutex::new(Inner {
                    status: PlaybackStatus::Idle,
                    last_error: None,
                    generation: 0,
                    transport: None,
                    presentation: Presentation::default(),
                }),
                status_tx,
            }),
            factory,
            signaling,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            gather_timeout: Duration::from_millis(config.gather_timeout_ms),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn selector(&self) -> &StreamId {
        &self.selector
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared.inner.lock().status
    }

    /// Human-readable cause of the last failure
    pub fn last_error(&self) -> Option<PlaybackError> {
        self.shared.inner.lock().last_error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Open a new transport and negotiate. Any previous transport is closed first.
    ///
    /// Failures land in `status()`/`last_error()`; the returned status is
    /// the state right after negotiation, usually `Connecting` until the
    /// first track arrives.
    pub async fn start(&self) -> PlaybackStatus {
        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            if let Some(previous) = inner.transport.take() {
                debug!("Session {} closing previous transport", self.shared.id);
                previous.close();
            }
            inner.last_error = None;
            self.shared.set_status(&mut inner, PlaybackStatus::Connecting);
            inner.generation
        };

        info!("Session {} connecting to stream {}", self.shared.id, self.selector);
        if let Err(e) = self.negotiate(generation).await {
            self.shared.fail(generation, e);
        }
        self.status()
    }

    async fn negotiate(&self, generation: u64) -> Result<(), PlaybackError> {
        let transport = self.factory.open().await?;

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        transport.on_track(Box::new(move |track| {
            if let Some(shared) = weak.upgrade() {
                shared.track_arrived(generation, track);
            }
        }));
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        transport.on_connection_state_change(Box::new(move |state| {
            if let Some(shared) = weak.upgrade() {
                shared.connection_changed(generation, state);
            }
        }));

        if !self.shared.adopt(generation, transport.clone()) {
            transport.close();
            return Ok(());
        }

        let offer = tokio::time::timeout(self.gather_timeout, transport.gather_offer())
            .await
            .map_err(|_| {
                PlaybackError::Timeout(format!(
                    "ICE gathering did not complete within {}ms",
                    self.gather_timeout.as_millis()
                ))
            })??;
        if !self.shared.is_current(generation) {
            return Ok(());
        }

        let answer = self.signaling.exchange(&offer).await?;
        if !self.shared.is_current(generation) {
            debug!("Session {} discarding answer for a stopped attempt", self.shared.id);
            return Ok(());
        }

        transport.apply_answer(&answer).await?;
        debug!("Session {} remote description applied", self.shared.id);
        Ok(())
    }

    /// Close the transport and return to idle
    pub fn stop(&self) {
        self.shared.release();
        info!("Session {} stopped", self.shared.id);
    }

    /// Stop, wait the fixed retry delay, start again. Never triggered automatically.
    pub async fn retry(&self) -> PlaybackStatus {
        self.stop();
        let generation = self.shared.inner.lock().generation;
        tokio::time::sleep(self.retry_delay).await;
        // an explicit stop during the delay wins
        if !self.shared.is_current(generation) {
            debug!("Session {} retry cancelled by stop", self.shared.id);
            return self.status();
        }
        self.start().await
    }

    /// Pause rendering. Only meaningful while playing.
    pub fn pause(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.status != PlaybackStatus::Playing {
            return false;
        }
        if let Some(transport) = &inner.transport {
            transport.set_paused(true);
        }
        self.shared.set_status(&mut inner, PlaybackStatus::Paused);
        true
    }

    pub fn resume(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.status != PlaybackStatus::Paused {
            return false;
        }
        if let Some(transport) = &inner.transport {
            transport.set_paused(false);
        }
        self.shared.set_status(&mut inner, PlaybackStatus::Playing);
        true
    }

    /// Play button: start from idle/error, otherwise flip between playing and paused
    pub async fn toggle_play(&self) -> PlaybackStatus {
        match self.status() {
            PlaybackStatus::Idle | PlaybackStatus::Error => self.start().await,
            PlaybackStatus::Playing => {
                self.pause();
                self.status()
            }
            PlaybackStatus::Paused => {
                self.resume();
                self.status()
            }
            PlaybackStatus::Connecting => PlaybackStatus::Connecting,
        }
    }

    pub fn presentation(&self) -> Presentation {
        self.shared.inner.lock().presentation
    }

    pub fn toggle_mute(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        inner.presentation.muted = !inner.presentation.muted;
        inner.presentation.muted
    }

    pub fn toggle_fullscreen(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        inner.presentation.fullscreen = !inner.presentation.fullscreen;
        inner.presentation.fullscreen
    }
}

impl Drop for NegotiationSession {
    fn drop(&mut self) {
        self.shared.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use crate::playback::transport::{StateHandler, TrackHandler};

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct FakeTransport {
        n: usize,
        log: EventLog,
        hang_gathering: bool,
        track: Mutex<Option<TrackHandler>>,
        state: Mutex<Option<StateHandler>>,
    }

    impl FakeTransport {
        fn fire_track(&self) {
            if let Some(handler) = self.track.lock().as_ref() {
                handler(TrackInfo {
                    kind: "video".to_string(),
                    codec: "video/H264".to_string(),
                });
            }
        }

        fn fire_state(&self, state: TransportState) {
            if let Some(handler) = self.state.lock().as_ref() {
                handler(state);
            }
        }
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        fn on_track(&self, handler: TrackHandler) {
            self.log.lock().push(format!("on_track#{}", self.n));
            *self.track.lock() = Some(handler);
        }

        fn on_connection_state_change(&self, handler: StateHandler) {
            self.log.lock().push(format!("on_state#{}", self.n));
            *self.state.lock() = Some(handler);
        }

        async fn gather_offer(&self) -> Result<String, PlaybackError> {
            if self.hang_gathering {
                std::future::pending::<()>().await;
            }
            self.log.lock().push(format!("gathered#{}", self.n));
            Ok(format!("offer#{}", self.n))
        }

        async fn apply_answer(&self, sdp: &str) -> Result<(), PlaybackError> {
            self.log.lock().push(format!("answer#{}:{}", self.n, sdp));
            Ok(())
        }

        fn set_paused(&self, paused: bool) {
            self.log.lock().push(format!("paused#{}:{}", self.n, paused));
        }

        fn close(&self) {
            self.log.lock().push(format!("close#{}", self.n));
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        log: EventLog,
        hang_gathering: bool,
        fail_open: bool,
        opened: Mutex<Vec<Arc<FakeTransport>>>,
    }

    impl FakeFactory {
        fn transport(&self, n: usize) -> Arc<FakeTransport> {
            self.opened.lock()[n - 1].clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.log.lock().iter().filter(|e| e.starts_with(prefix)).count()
        }

        fn position(&self, entry: &str) -> usize {
            self.log
                .lock()
                .iter()
                .position(|e| e.starts_with(entry))
                .unwrap_or_else(|| panic!("{} not logged", entry))
        }
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn open(&self) -> Result<Arc<dyn MediaTransport>, PlaybackError> {
            if self.fail_open {
                return Err(PlaybackError::TransportFailed("no ICE agent".to_string()));
            }
            let mut opened = self.opened.lock();
            let n = opened.len() + 1;
            self.log.lock().push(format!("open#{}", n));
            let transport = Arc::new(FakeTransport {
                n,
                log: self.log.clone(),
                hang_gathering: self.hang_gathering,
                track: Mutex::new(None),
                state: Mutex::new(None),
            });
            opened.push(transport.clone());
            Ok(transport)
        }
    }

    struct FakeSignaling {
        log: EventLog,
        reply: Result<String, PlaybackError>,
        hold: Option<Arc<Notify>>,
        exchanges: AtomicUsize,
    }

    #[async_trait]
    impl SignalingEndpoint for FakeSignaling {
        async fn exchange(&self, offer_sdp: &str) -> Result<String, PlaybackError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(format!("exchange:{}", offer_sdp));
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            self.reply.clone()
        }
    }

    struct Harness {
        factory: Arc<FakeFactory>,
        signaling: Arc<FakeSignaling>,
        session: Arc<NegotiationSession>,
    }

    fn harness_with(
        factory: FakeFactory,
        reply: Result<String, PlaybackError>,
        hold: Option<Arc<Notify>>,
    ) -> Harness {
        let factory = Arc::new(factory);
        let signaling = Arc::new(FakeSignaling {
            log: factory.log.clone(),
            reply,
            hold,
            exchanges: AtomicUsize::new(0),
        });
        let config = PlaybackConfig {
            retry_delay_ms: 10,
            gather_timeout_ms: 50,
            ..Default::default()
        };
        let session = Arc::new(NegotiationSession::new(
            StreamId::Id(7),
            factory.clone(),
            signaling.clone(),
            &config,
        ));
        Harness {
            factory,
            signaling,
            session,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeFactory::default(), Ok("answer".to_string()), None)
    }

    #[tokio::test]
    async fn first_track_moves_connecting_to_playing() {
        let h = harness();
        assert_eq!(h.session.status(), PlaybackStatus::Idle);
        assert_eq!(h.session.start().await, PlaybackStatus::Connecting);
        assert!(h.factory.count("answer#1:answer") == 1);

        h.factory.transport(1).fire_track();
        assert_eq!(h.session.status(), PlaybackStatus::Playing);
        h.factory.transport(1).fire_track();
        assert_eq!(h.session.status(), PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn callbacks_register_before_gathering_and_gathering_precedes_exchange() {
        let h = harness();
        h.session.start().await;
        let gathered = h.factory.position("gathered#1");
        assert!(h.factory.position("on_track#1") < gathered);
        assert!(h.factory.position("on_state#1") < gathered);
        assert!(gathered < h.factory.position("exchange:offer#1"));
    }

    #[tokio::test]
    async fn restart_closes_previous_transport_before_opening() {
        let h = harness();
        h.session.start().await;
        h.session.start().await;
        assert_eq!(h.factory.count("open#"), 2);
        assert_eq!(h.factory.count("close#"), 1);
        assert!(h.factory.position("close#1") < h.factory.position("open#2"));

        // the replaced transport can no longer move the session
        h.factory.transport(1).fire_state(TransportState::Failed);
        h.factory.transport(1).fire_track();
        assert_eq!(h.session.status(), PlaybackStatus::Connecting);
        h.factory.transport(2).fire_track();
        assert_eq!(h.session.status(), PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn connection_failure_moves_playing_to_error() {
        let h = harness();
        h.session.start().await;
        h.factory.transport(1).fire_track();
        h.factory.transport(1).fire_state(TransportState::Connected);
        assert_eq!(h.session.status(), PlaybackStatus::Playing);

        h.factory.transport(1).fire_state(TransportState::Failed);
        assert_eq!(h.session.status(), PlaybackStatus::Error);
        assert_eq!(
            h.session.last_error(),
            Some(PlaybackError::TransportFailed("connection failed".to_string()))
        );
    }

    #[tokio::test]
    async fn disconnect_while_connecting_is_an_error() {
        let h = harness();
        h.session.start().await;
        h.factory.transport(1).fire_state(TransportState::Disconnected);
        assert_eq!(h.session.status(), PlaybackStatus::Error);
    }

    #[tokio::test]
    async fn rejected_negotiation_never_applies_a_description() {
        let h = harness_with(
            FakeFactory::default(),
            Err(PlaybackError::NegotiationRejected("stream not found".to_string())),
            None,
        );
        assert_eq!(h.session.start().await, PlaybackStatus::Error);
        assert_eq!(h.session.last_error().unwrap().to_string(), "stream not found");
        assert_eq!(h.factory.count("answer#"), 0);
    }

    #[tokio::test]
    async fn stop_mid_connecting_closes_and_ignores_late_events() {
        let hold = Arc::new(Notify::new());
        let h = harness_with(FakeFactory::default(), Ok("answer".to_string()), Some(hold.clone()));

        let session = h.session.clone();
        let attempt = tokio::spawn(async move { session.start().await });
        while h.signaling.exchanges.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.session.status(), PlaybackStatus::Connecting);

        h.session.stop();
        assert_eq!(h.factory.count("close#1"), 1);
        assert_eq!(h.session.status(), PlaybackStatus::Idle);

        h.factory.transport(1).fire_track();
        assert_eq!(h.session.status(), PlaybackStatus::Idle);

        hold.notify_one();
        assert_eq!(attempt.await.unwrap(), PlaybackStatus::Idle);
        assert_eq!(h.factory.count("answer#"), 0);
        assert_eq!(h.factory.count("open#"), 1);
    }

    #[tokio::test]
    async fn gathering_timeout_is_reported() {
        let factory = FakeFactory {
            hang_gathering: true,
            ..Default::default()
        };
        let h = harness_with(factory, Ok("answer".to_string()), None);
        assert_eq!(h.session.start().await, PlaybackStatus::Error);
        assert!(matches!(h.session.last_error(), Some(PlaybackError::Timeout(_))));
        assert_eq!(h.signaling.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_failure_is_a_transport_error() {
        let factory = FakeFactory {
            fail_open: true,
            ..Default::default()
        };
        let h = harness_with(factory, Ok("answer".to_string()), None);
        assert_eq!(h.session.start().await, PlaybackStatus::Error);
        assert!(matches!(
            h.session.last_error(),
            Some(PlaybackError::TransportFailed(_))
        ));
    }

    #[tokio::test]
    async fn errors_are_not_retried_automatically() {
        let h = harness();
        h.session.start().await;
        h.factory.transport(1).fire_state(TransportState::Failed);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(h.factory.count("open#"), 1);
        assert_eq!(h.session.status(), PlaybackStatus::Error);
    }

    #[tokio::test]
    async fn retry_stops_then_starts_fresh() {
        let h = harness();
        h.session.start().await;
        h.factory.transport(1).fire_state(TransportState::Failed);

        assert_eq!(h.session.retry().await, PlaybackStatus::Connecting);
        assert!(h.session.last_error().is_none());
        assert!(h.factory.position("close#1") < h.factory.position("open#2"));
        h.factory.transport(2).fire_track();
        assert_eq!(h.session.status(), PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn stop_during_retry_delay_stays_idle() {
        let h = harness();
        h.session.start().await;
        h.factory.transport(1).fire_state(TransportState::Failed);

        let session = h.session.clone();
        let retrying = tokio::spawn(async move { session.retry().await });
        while h.factory.count("close#1") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        h.session.stop();

        assert_eq!(retrying.await.unwrap(), PlaybackStatus::Idle);
        assert_eq!(h.session.status(), PlaybackStatus::Idle);
        assert_eq!(h.factory.count("open#"), 1);
    }

    #[tokio::test]
    async fn pause_and_resume_stay_local() {
        let h = harness();
        h.session.start().await;
        assert!(!h.session.pause());
        h.factory.transport(1).fire_track();

        assert_eq!(h.session.toggle_play().await, PlaybackStatus::Paused);
        assert_eq!(h.factory.count("paused#1:true"), 1);
        assert_eq!(h.session.toggle_play().await, PlaybackStatus::Playing);
        assert_eq!(h.factory.count("paused#1:false"), 1);
        assert_eq!(h.factory.count("open#"), 1);
        assert_eq!(h.signaling.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn presentation_toggles_leave_status_alone() {
        let h = harness();
        h.session.start().await;
        h.factory.transport(1).fire_track();
        assert!(!h.session.toggle_mute());
        assert!(h.session.toggle_fullscreen());
        assert_eq!(
            h.session.presentation(),
            Presentation { muted: false, fullscreen: true }
        );
        assert_eq!(h.session.status(), PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let h = harness();
        let mut rx = h.session.subscribe();
        h.session.start().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), PlaybackStatus::Connecting);
        h.factory.transport(1).fire_track();
        assert_eq!(*rx.borrow_and_update(), PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn dropping_the_session_closes_its_transport() {
        let h = harness();
        h.session.start().await;
        let factory = h.factory.clone();
        drop(h);
        assert_eq!(factory.count("close#1"), 1);
    }
}
