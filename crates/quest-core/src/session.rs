//! One proximity screen visit.
//!
//! A [`ScanSession`] owns the radio scan and the location watch for as long
//! as the screen is shown. Both producers write into one channel; a single
//! task reduces the events through the [`ProximityEngine`] and republishes
//! the state after each one.
//!
//! Teardown cancels the location watch and stops the radio before the task
//! exits. Events still queued at that point are discarded.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::QuestConfig;
use crate::directory::{BeaconDirectory, BeaconSource};
use crate::engine::{NearBeacon, ProximityEngine, ProximityEvent, ProximityState};
use crate::error::Capability;
use crate::haptics::Haptics;
use crate::location::{LocationSource, LocationSubscription, WatchOptions};
use crate::radio::{MatchForwarder, NameFilter, RadioScanner};
use crate::signal::SignalModel;

/// A running (or failed-to-start) proximity session.
pub struct ScanSession {
    id: Uuid,
    state: watch::Receiver<ProximityState>,
    prompts: mpsc::UnboundedReceiver<NearBeacon>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    // Engine kept here when setup stopped before the streams started.
    stalled: Option<(ProximityEngine, watch::Sender<ProximityState>)>,
}

impl ScanSession {
    /// Set up a session: permissions, directory, then both streams.
    ///
    /// Never fails. A refused location permission leaves the session in
    /// [`SessionPhase::PermissionRequired`](crate::engine::SessionPhase::PermissionRequired);
    /// a failed directory fetch in
    /// [`SessionPhase::Unavailable`](crate::engine::SessionPhase::Unavailable).
    /// A refused radio permission only disables signal feedback.
    pub async fn start<R, L>(
        config: &QuestConfig,
        source: &dyn BeaconSource,
        radio: R,
        location: L,
        haptics: Arc<dyn Haptics>,
    ) -> Self
    where
        R: RadioScanner + 'static,
        L: LocationSource + 'static,
    {
        let id = Uuid::new_v4();
        let span = info_span!("scan_session", session_id = %id);
        Self::setup(id, span.clone(), config, source, radio, location, haptics)
            .instrument(span)
            .await
    }

    async fn setup<R, L>(
        id: Uuid,
        span: Span,
        config: &QuestConfig,
        source: &dyn BeaconSource,
        mut radio: R,
        mut location: L,
        haptics: Arc<dyn Haptics>,
    ) -> Self
    where
        R: RadioScanner + 'static,
        L: LocationSource + 'static,
    {
        let mut engine = ProximityEngine::new(config);
        engine.begin();
        let (state_tx, state_rx) = watch::channel(engine.state().clone());

        let stalled = |engine: ProximityEngine, state_tx: watch::Sender<ProximityState>| {
            state_tx.send_replace(engine.state().clone());
            Self {
                id,
                state: state_rx.clone(),
                prompts: mpsc::unbounded_channel().1,
                cancel: CancellationToken::new(),
                task: None,
                stalled: Some((engine, state_tx)),
            }
        };

        if !location.request_permission().await {
            warn!("location permission denied");
            engine.permission_denied(Capability::Location);
            return stalled(engine, state_tx);
        }

        let radio_granted = radio.request_permissions().await.is_granted();
        if !radio_granted {
            warn!("radio permission denied, continuing without signal feedback");
            engine.permission_denied(Capability::Radio);
        }

        let directory = match BeaconDirectory::load(source).await {
            Ok(directory) => directory,
            Err(e) => {
                warn!(error = %e, "beacon directory unavailable");
                engine.fail(&e);
                return stalled(engine, state_tx);
            }
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let radio_running = if radio_granted {
            let forwarder = MatchForwarder::new(
                NameFilter::new(&config.radio),
                SignalModel::new(&config.signal),
                haptics,
                event_tx.clone(),
            );
            match radio.start(forwarder).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "radio scan unavailable, continuing without signal feedback");
                    false
                }
            }
        } else {
            false
        };

        let subscription = match location
            .watch(WatchOptions::from(&config.location), event_tx)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "location watch failed");
                radio.stop().await;
                engine.fail(&e);
                return stalled(engine, state_tx);
            }
        };

        engine.activate(directory, radio_running);
        state_tx.send_replace(engine.state().clone());

        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            run(
                engine,
                event_rx,
                state_tx,
                prompt_tx,
                cancel.clone(),
                radio,
                subscription,
            )
            .instrument(span),
        );

        Self {
            id,
            state: state_rx,
            prompts: prompt_rx,
            cancel,
            task: Some(task),
            stalled: None,
        }
    }

    /// Session identifier, also recorded on the tracing span.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> ProximityState {
        self.state.borrow().clone()
    }

    /// A receiver that is notified on every state update.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProximityState> {
        self.state.clone()
    }

    /// Wait for the next "near a beacon" prompt. `None` once the session
    /// has ended or never started.
    pub async fn next_prompt(&mut self) -> Option<NearBeacon> {
        self.prompts.recv().await
    }

    /// A prompt, if one is waiting.
    pub fn try_prompt(&mut self) -> Option<NearBeacon> {
        self.prompts.try_recv().ok()
    }

    /// Begin teardown without waiting. Further events are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Tear down and wait until both streams are released.
    pub async fn end(mut self) -> ProximityState {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(session_id = %self.id, error = %e, "session task failed");
            }
        }
        if let Some((mut engine, state_tx)) = self.stalled.take() {
            engine.terminate();
            state_tx.send_replace(engine.state().clone());
        }
        info!(session_id = %self.id, "scan session ended");
        self.state()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<R: RadioScanner>(
    mut engine: ProximityEngine,
    mut events: mpsc::UnboundedReceiver<ProximityEvent>,
    state: watch::Sender<ProximityState>,
    prompts: mpsc::UnboundedSender<NearBeacon>,
    cancel: CancellationToken,
    mut radio: R,
    subscription: LocationSubscription,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(prompt) = engine.apply(event) {
                        let _ = prompts.send(prompt);
                    }
                    state.send_replace(engine.state().clone());
                }
                // Both producers finished; stay active until torn down.
                None => {
                    cancel.cancelled().await;
                    break;
                }
            },
        }
    }

    subscription.shutdown().await;
    radio.stop().await;
    engine.terminate();
    state.send_replace(engine.state().clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::{raw, FixtureSource};
    use crate::engine::tests::{north, ORIGIN};
    use crate::engine::SessionPhase;
    use crate::haptics::RecordingHaptics;
    use crate::location::ManualLocationSource;
    use crate::radio::{MockDevice, MockScanner, RadioPermissions};

    fn source() -> FixtureSource {
        FixtureSource(Some(vec![
            raw("fountain", &format!("{}, {}", ORIGIN.latitude, ORIGIN.longitude)),
            raw("broken", "n/a"),
        ]))
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ProximityState>,
        f: impl Fn(&ProximityState) -> bool,
    ) -> ProximityState {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.wait_for(|s| f(s)))
            .await
            .expect("timed out waiting for state")
            .expect("session closed")
            .clone()
    }

    #[tokio::test]
    async fn test_full_session_lifecycle() {
        let (location, feed) = ManualLocationSource::new(true);
        let radio = MockScanner::new();
        let radio_handle = radio.clone();
        let haptics = RecordingHaptics::new();

        let mut session = ScanSession::start(
            &QuestConfig::default(),
            &source(),
            radio,
            location,
            Arc::new(haptics.clone()),
        )
        .await;

        let state = session.state();
        assert_eq!(state.phase, SessionPhase::Active);
        assert_eq!(state.beacon_count, 1);
        assert!(state.radio_available);

        let mut rx = session.subscribe();
        assert!(feed.push(north(150.0)));
        assert!(feed.push(north(90.0)));
        let near = session.next_prompt().await.unwrap();
        assert_eq!(near.beacon.id, "fountain");

        assert!(radio_handle.advertise(&MockDevice::new("AA", "Beacon-1", Some(-75))));
        let state = wait_for(&mut rx, |s| s.signal.is_some()).await;
        assert_eq!(state.signal.unwrap().normalized_percent, 50);
        assert!(state.reading.unwrap().is_within_range);
        assert_eq!(haptics.played().len(), 1);

        let last = session.end().await;
        assert_eq!(last.phase, SessionPhase::Terminated);
        assert!(!radio_handle.is_scanning());
    }

    #[tokio::test]
    async fn test_callbacks_after_end_do_not_change_state() {
        let (location, feed) = ManualLocationSource::new(true);
        let radio = MockScanner::new();
        let radio_handle = radio.clone();

        let session = ScanSession::start(
            &QuestConfig::default(),
            &source(),
            radio,
            location,
            Arc::new(RecordingHaptics::new()),
        )
        .await;
        let mut rx = session.subscribe();

        feed.push(north(500.0));
        wait_for(&mut rx, |s| s.position.is_some()).await;

        let before = session.end().await;

        // Late deliveries from both producers.
        assert!(!feed.push(north(5.0)));
        assert!(!radio_handle.advertise(&MockDevice::new("AA", "Beacon", Some(-50))));
        tokio::task::yield_now().await;

        assert_eq!(*rx.borrow(), before);
        assert_eq!(before.phase, SessionPhase::Terminated);
        assert!(before.signal.is_none());
    }

    #[tokio::test]
    async fn test_location_denied_requires_permission() {
        let (location, feed) = ManualLocationSource::new(false);
        let radio = MockScanner::new();
        let radio_handle = radio.clone();

        let mut session = ScanSession::start(
            &QuestConfig::default(),
            &source(),
            radio,
            location,
            Arc::new(RecordingHaptics::new()),
        )
        .await;

        let state = session.state();
        assert_eq!(state.phase, SessionPhase::PermissionRequired);
        assert!(state.error.is_some());
        assert!(!radio_handle.is_scanning());
        assert!(!feed.push(ORIGIN));
        assert!(session.next_prompt().await.is_none());

        assert_eq!(session.end().await.phase, SessionPhase::Terminated);
    }

    #[tokio::test]
    async fn test_radio_denied_still_tracks_location() {
        let (location, feed) = ManualLocationSource::new(true);
        let radio = MockScanner::with_permissions(RadioPermissions {
            fine_location: true,
            radio_scan: false,
            radio_connect: true,
        });

        let mut session = ScanSession::start(
            &QuestConfig::default(),
            &source(),
            radio,
            location,
            Arc::new(RecordingHaptics::new()),
        )
        .await;

        assert_eq!(session.state().phase, SessionPhase::Active);
        assert!(!session.state().radio_available);
        feed.push(north(20.0));
        assert!(session.next_prompt().await.is_some());
        session.end().await;
    }

    #[tokio::test]
    async fn test_directory_failure_is_surfaced() {
        let (location, _feed) = ManualLocationSource::new(true);
        let radio = MockScanner::new();
        let radio_handle = radio.clone();

        let session = ScanSession::start(
            &QuestConfig::default(),
            &FixtureSource(None),
            radio,
            location,
            Arc::new(RecordingHaptics::new()),
        )
        .await;

        let state = session.state();
        assert_eq!(state.phase, SessionPhase::Unavailable);
        assert!(state.error.unwrap().contains("server"));
        assert_eq!(radio_handle.lifecycle_counts(), (0, 0));
        session.end().await;
    }

    #[tokio::test]
    async fn test_drop_releases_streams() {
        let (location, feed) = ManualLocationSource::new(true);
        let radio = MockScanner::new();
        let radio_handle = radio.clone();

        let session = ScanSession::start(
            &QuestConfig::default(),
            &source(),
            radio,
            location,
            Arc::new(RecordingHaptics::new()),
        )
        .await;
        let mut rx = session.subscribe();
        drop(session);

        wait_for(&mut rx, |s| s.phase == SessionPhase::Terminated).await;
        assert!(!radio_handle.is_scanning());
        assert!(!feed.push(ORIGIN));
    }
}
