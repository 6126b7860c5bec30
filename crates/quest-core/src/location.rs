//! Location fixes for the proximity session.
//!
//! A [`LocationSource`] hands out fixes through a cancellable
//! [`LocationSubscription`]. Sources apply the configured minimum movement
//! themselves, so a fix is only delivered after the device has moved at
//! least that far from the last delivered one.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Accuracy, LocationConfig};
use crate::engine::ProximityEvent;
use crate::error::Result;
use crate::geo::{distance, Coordinate};

/// How fixes should be delivered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Requested accuracy.
    pub accuracy: Accuracy,
    /// Minimum movement between delivered fixes.
    pub min_distance_metres: f64,
}

impl From<&LocationConfig> for WatchOptions {
    fn from(config: &LocationConfig) -> Self {
        Self {
            accuracy: config.accuracy,
            min_distance_metres: config.min_distance_metres,
        }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from(&LocationConfig::default())
    }
}

/// Drops fixes closer than a minimum distance to the last accepted one.
#[derive(Debug, Clone)]
pub struct MinDistanceFilter {
    min_distance_metres: f64,
    last: Option<Coordinate>,
}

impl MinDistanceFilter {
    /// Create a filter; the first fix is always accepted.
    #[must_use]
    pub const fn new(min_distance_metres: f64) -> Self {
        Self {
            min_distance_metres,
            last: None,
        }
    }

    /// Accept or drop `fix`.
    pub fn accept(&mut self, fix: Coordinate) -> bool {
        let moved = self
            .last
            .map_or(true, |last| distance(last, fix) >= self.min_distance_metres);
        if moved {
            self.last = Some(fix);
        }
        moved
    }
}

/// Handle to a running location watch.
///
/// Cancelling stops further fixes. Safe to cancel any number of times;
/// dropping the handle cancels too.
#[derive(Debug)]
pub struct LocationSubscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LocationSubscription {
    /// Subscription controlled by `token`, optionally backed by a task.
    #[must_use]
    pub const fn new(token: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self { token, task }
    }

    /// Stop delivering fixes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the backing task to finish.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A platform location capability.
#[async_trait]
pub trait LocationSource: Send {
    /// Ask for location permission. `false` means the feature cannot run.
    async fn request_permission(&mut self) -> bool;

    /// Start delivering fixes into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses to start the watch.
    async fn watch(
        &mut self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<ProximityEvent>,
    ) -> Result<LocationSubscription>;
}

struct FeedTarget {
    filter: MinDistanceFilter,
    sink: mpsc::UnboundedSender<ProximityEvent>,
    token: CancellationToken,
}

/// Location source driven by the embedding platform pushing fixes.
///
/// Fixes go through [`LocationFeed::push`], which runs synchronously in the
/// caller like a platform callback.
pub struct ManualLocationSource {
    granted: bool,
    target: Arc<Mutex<Option<FeedTarget>>>,
}

/// Pushes fixes into a [`ManualLocationSource`].
#[derive(Clone)]
pub struct LocationFeed {
    target: Arc<Mutex<Option<FeedTarget>>>,
}

impl ManualLocationSource {
    /// Source and its feed. `granted` is the permission answer.
    #[must_use]
    pub fn new(granted: bool) -> (Self, LocationFeed) {
        let target = Arc::new(Mutex::new(None));
        (
            Self {
                granted,
                target: Arc::clone(&target),
            },
            LocationFeed { target },
        )
    }
}

impl LocationFeed {
    /// Deliver one fix. Returns `true` if it reached the session; fixes
    /// are dropped when unwatched, cancelled, or filtered by distance.
    pub fn push(&self, fix: Coordinate) -> bool {
        let Ok(mut guard) = self.target.lock() else {
            return false;
        };
        let Some(target) = guard.as_mut() else {
            return false;
        };
        if target.token.is_cancelled() || !target.filter.accept(fix) {
            return false;
        }
        target.sink.send(ProximityEvent::Location(fix)).is_ok()
    }
}

#[async_trait]
impl LocationSource for ManualLocationSource {
    async fn request_permission(&mut self) -> bool {
        self.granted
    }

    async fn watch(
        &mut self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<ProximityEvent>,
    ) -> Result<LocationSubscription> {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.target.lock() {
            *guard = Some(FeedTarget {
                filter: MinDistanceFilter::new(options.min_distance_metres),
                sink,
                token: token.clone(),
            });
        }
        Ok(LocationSubscription::new(token, None))
    }
}

/// Replays recorded fixes at a fixed interval.
///
/// Used on hosts without a GNSS receiver and for field-test playback.
#[derive(Debug, Clone)]
pub struct ReplayLocationSource {
    fixes: Vec<Coordinate>,
    interval: Duration,
}

impl ReplayLocationSource {
    /// Replay `fixes`, one per `interval`.
    #[must_use]
    pub const fn new(fixes: Vec<Coordinate>, interval: Duration) -> Self {
        Self { fixes, interval }
    }

    /// Load fixes from a file of `"lat, lng"` lines.
    ///
    /// Blank lines and `#` comments are ignored; unparseable lines are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path, interval: Duration) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(parse_track(&content), interval))
    }

    /// Number of recorded fixes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    /// Whether there is nothing to replay.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

fn parse_track(content: &str) -> Vec<Coordinate> {
    content
        .lines()
        .enumerate()
        .filter_map(|(n, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let fix = Coordinate::parse(line);
            if fix.is_none() {
                warn!(line = n + 1, "skipping unparseable fix");
            }
            fix
        })
        .collect()
}

#[async_trait]
impl LocationSource for ReplayLocationSource {
    async fn request_permission(&mut self) -> bool {
        true
    }

    async fn watch(
        &mut self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<ProximityEvent>,
    ) -> Result<LocationSubscription> {
        let token = CancellationToken::new();
        let child = token.clone();
        let fixes = self.fixes.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut filter = MinDistanceFilter::new(options.min_distance_metres);
            for fix in fixes {
                if !filter.accept(fix) {
                    continue;
                }
                if child.is_cancelled() || sink.send(ProximityEvent::Location(fix)).is_err() {
                    break;
                }
                tokio::select! {
                    biased;
                    () = child.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!("location replay finished");
        });

        Ok(LocationSubscription::new(token, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::north;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProximityEvent>) -> Vec<Coordinate> {
        let mut out = Vec::new();
        while let Ok(ProximityEvent::Location(c)) = rx.try_recv() {
            out.push(c);
        }
        out
    }

    #[test]
    fn test_min_distance_filter() {
        let mut filter = MinDistanceFilter::new(10.0);
        assert!(filter.accept(north(0.0)));
        assert!(!filter.accept(north(5.0)));
        assert!(!filter.accept(north(9.0)));
        assert!(filter.accept(north(12.0)));
        assert!(!filter.accept(north(15.0)));
    }

    #[tokio::test]
    async fn test_manual_source_delivers_until_cancelled() {
        let (mut source, feed) = ManualLocationSource::new(true);
        assert!(source.request_permission().await);
        assert!(!feed.push(north(0.0)), "nothing is watching yet");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = source.watch(WatchOptions::default(), tx).await.unwrap();

        assert!(feed.push(north(0.0)));
        assert!(!feed.push(north(3.0)));
        assert!(feed.push(north(20.0)));

        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());
        assert!(!feed.push(north(100.0)));

        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_dropping_subscription_cancels() {
        let (mut source, feed) = ManualLocationSource::new(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = source.watch(WatchOptions::default(), tx).await.unwrap();
        drop(sub);
        assert!(!feed.push(north(0.0)));
    }

    #[test]
    fn test_parse_track_skips_noise() {
        let fixes = parse_track("# walk\n1.0, 2.0\n\nnot a fix\n3.0,4.0\n");
        assert_eq!(fixes, [Coordinate::new(1.0, 2.0), Coordinate::new(3.0, 4.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_delivers_filtered_fixes() {
        let mut source = ReplayLocationSource::new(
            vec![north(0.0), north(2.0), north(50.0), north(120.0)],
            Duration::from_secs(1),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = source.watch(WatchOptions::default(), tx).await.unwrap();
        sub.shutdown().await;

        // Cancelled straight away: at most the first fix made it out.
        assert!(drain(&mut rx).len() <= 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = source.watch(WatchOptions::default(), tx).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(drain(&mut rx), [north(0.0), north(50.0), north(120.0)]);
        sub.shutdown().await;
    }

    #[test]
    fn test_replay_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.txt");
        std::fs::write(&path, "-27.5263381, 153.0954163\n-27.52544, 153.0954163\n").unwrap();

        let source = ReplayLocationSource::from_file(&path, Duration::from_millis(10)).unwrap();
        assert_eq!(source.len(), 2);
        assert!(!source.is_empty());
    }
}
