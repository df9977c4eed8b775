use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::geo;
use crate::models::ride::Coordinate;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Maximum acceptable age of a cached reading. Always zero here:
    /// every reading must be fresh.
    pub maximum_age: Duration,
}

impl WatchOptions {
    pub fn fresh(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }
}

/// The host platform's continuous position stream, injectable so the
/// watcher runs against a scripted provider in tests.
///
/// Each stream item is a fresh reading or a classified failure
/// (`GeolocationDenied` / `GeolocationTimeout` / `GeolocationUnavailable`);
/// failures do not end the stream.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn watch_position(
        &self,
        options: WatchOptions,
    ) -> Result<mpsc::Receiver<Result<Coordinate, SyncError>>, SyncError>;
}

/// Collapses the platform position stream into a single current-location
/// value. Last reading wins; errors are reported out-of-band and leave
/// the watch running.
pub struct GeolocationWatcher;

impl GeolocationWatcher {
    pub async fn start(
        provider: Arc<dyn LocationProvider>,
        options: WatchOptions,
        metrics: Metrics,
    ) -> Result<WatchHandle, SyncError> {
        let stream = provider.watch_position(options).await?;
        let (current_tx, current_rx) = watch::channel(None);
        let (errors_tx, errors_rx) = mpsc::channel(16);

        let task = tokio::spawn(run_watch(stream, current_tx, errors_tx, metrics));

        Ok(WatchHandle {
            current_rx,
            errors_rx: Some(errors_rx),
            task: Some(task),
        })
    }
}

pub struct WatchHandle {
    current_rx: watch::Receiver<Option<Coordinate>>,
    errors_rx: Option<mpsc::Receiver<SyncError>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn current(&self) -> Option<Coordinate> {
        *self.current_rx.borrow()
    }

    pub fn updates(&self) -> watch::Receiver<Option<Coordinate>> {
        self.current_rx.clone()
    }

    /// The classified-failure channel; can be taken once.
    pub fn errors(&mut self) -> Option<mpsc::Receiver<SyncError>> {
        self.errors_rx.take()
    }

    /// Releases the watch. Idempotent; once this returns, no further
    /// reading is applied and no error is delivered.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_watch(
    mut stream: mpsc::Receiver<Result<Coordinate, SyncError>>,
    current_tx: watch::Sender<Option<Coordinate>>,
    errors_tx: mpsc::Sender<SyncError>,
    metrics: Metrics,
) {
    while let Some(item) = stream.recv().await {
        match item {
            Ok(coordinate) => {
                if !geo::is_valid(coordinate) {
                    debug!(?coordinate, "dropping out-of-range reading");
                    continue;
                }
                current_tx.send_replace(Some(coordinate));
            }
            Err(err) => {
                let reason = match &err {
                    SyncError::GeolocationDenied => "denied",
                    SyncError::GeolocationTimeout => "timeout",
                    _ => "unavailable",
                };
                metrics
                    .geolocation_errors_total
                    .with_label_values(&[reason])
                    .inc();
                warn!(error = %err, "geolocation reading failed");
                let _ = errors_tx.send(err).await;
            }
        }
    }
    debug!("position stream ended");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    use super::{GeolocationWatcher, LocationProvider, WatchOptions};
    use crate::error::SyncError;
    use crate::models::ride::Coordinate;
    use crate::observability::metrics::Metrics;

    struct FakeProvider {
        feed: Mutex<Option<mpsc::Receiver<Result<Coordinate, SyncError>>>>,
    }

    impl FakeProvider {
        fn new() -> (Arc<Self>, mpsc::Sender<Result<Coordinate, SyncError>>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    feed: Mutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    #[async_trait]
    impl LocationProvider for FakeProvider {
        async fn watch_position(
            &self,
            _options: WatchOptions,
        ) -> Result<mpsc::Receiver<Result<Coordinate, SyncError>>, SyncError> {
            self.feed
                .lock()
                .await
                .take()
                .ok_or_else(|| SyncError::GeolocationUnavailable("already watching".to_string()))
        }
    }

    fn reading(lat: f64, lng: f64) -> Result<Coordinate, SyncError> {
        Ok(Coordinate { lat, lng })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn last_reading_wins() {
        let (provider, feed) = FakeProvider::new();
        let handle = GeolocationWatcher::start(
            provider,
            WatchOptions::fresh(Duration::from_secs(10)),
            Metrics::new(),
        )
        .await
        .unwrap();

        feed.send(reading(40.0, -74.0)).await.unwrap();
        feed.send(reading(40.1, -74.1)).await.unwrap();
        feed.send(reading(40.2, -74.2)).await.unwrap();
        settle().await;

        let current = handle.current().unwrap();
        assert_eq!(current.lat, 40.2);
        assert_eq!(current.lng, -74.2);
    }

    #[tokio::test]
    async fn errors_are_reported_without_stopping_the_watch() {
        let (provider, feed) = FakeProvider::new();
        let metrics = Metrics::new();
        let mut handle = GeolocationWatcher::start(
            provider,
            WatchOptions::fresh(Duration::from_secs(10)),
            metrics.clone(),
        )
        .await
        .unwrap();
        let mut errors = handle.errors().unwrap();

        feed.send(Err(SyncError::GeolocationTimeout)).await.unwrap();
        feed.send(reading(41.0, -73.0)).await.unwrap();
        settle().await;

        assert!(matches!(
            errors.recv().await.unwrap(),
            SyncError::GeolocationTimeout
        ));
        assert_eq!(handle.current().unwrap().lat, 41.0);
        assert_eq!(
            metrics
                .geolocation_errors_total
                .with_label_values(&["timeout"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_silences_the_watch() {
        let (provider, feed) = FakeProvider::new();
        let mut handle = GeolocationWatcher::start(
            provider,
            WatchOptions::fresh(Duration::from_secs(10)),
            Metrics::new(),
        )
        .await
        .unwrap();

        feed.send(reading(40.0, -74.0)).await.unwrap();
        settle().await;
        assert!(handle.current().is_some());

        handle.stop().await;
        handle.stop().await;

        feed.send(reading(55.0, 12.0)).await.unwrap();
        settle().await;
        assert_eq!(handle.current().unwrap().lat, 40.0);
    }

    #[tokio::test]
    async fn out_of_range_readings_are_dropped() {
        let (provider, feed) = FakeProvider::new();
        let handle = GeolocationWatcher::start(
            provider,
            WatchOptions::fresh(Duration::from_secs(10)),
            Metrics::new(),
        )
        .await
        .unwrap();

        feed.send(reading(120.0, 0.0)).await.unwrap();
        settle().await;
        assert!(handle.current().is_none());
    }
}
