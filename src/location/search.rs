use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::geo;
use crate::models::place::{PlaceSuggestion, ResolvedLocation};
use crate::observability::metrics::Metrics;

/// External autocomplete/geocoding provider, injectable for tests.
#[async_trait]
pub trait PlaceSearchProvider: Send + Sync {
    async fn search_places(&self, query: &str) -> Result<Vec<PlaceSuggestion>, SyncError>;

    async fn resolve_place(
        &self,
        suggestion_id: &str,
    ) -> Result<Option<ResolvedLocation>, SyncError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Request sequence number; newer results carry a higher value.
    pub seq: u64,
    pub query: String,
    pub suggestions: Vec<PlaceSuggestion>,
}

/// Turns raw keystroke text into rate-limited provider lookups.
///
/// Trailing-edge debounce: every `search` call restarts the delay window
/// and only the last text within it reaches the provider. In-flight
/// lookups are never cancelled; responses are applied last-write-wins by
/// sequence number, so a slow stale response cannot overwrite a newer one.
pub struct PlaceSearchDebouncer {
    provider: Arc<dyn PlaceSearchProvider>,
    query_tx: mpsc::UnboundedSender<String>,
    results_rx: watch::Receiver<SearchResults>,
    task: Option<JoinHandle<()>>,
}

impl PlaceSearchDebouncer {
    pub fn new(provider: Arc<dyn PlaceSearchProvider>, debounce: Duration, metrics: Metrics) -> Self {
        let (query_tx, query_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = watch::channel(SearchResults::default());

        let task = tokio::spawn(run_debounce(
            provider.clone(),
            debounce,
            query_rx,
            results_tx,
            metrics,
        ));

        Self {
            provider,
            query_tx,
            results_rx,
            task: Some(task),
        }
    }

    /// Fire-and-forget; the lookup happens once the debounce window
    /// closes without further input.
    pub fn search(&self, text: impl Into<String>) {
        let _ = self.query_tx.send(text.into());
    }

    pub fn results(&self) -> watch::Receiver<SearchResults> {
        self.results_rx.clone()
    }

    pub fn current_results(&self) -> SearchResults {
        self.results_rx.borrow().clone()
    }

    /// Resolves a chosen suggestion into an address + coordinate.
    pub async fn resolve(&self, suggestion_id: &str) -> Result<ResolvedLocation, SyncError> {
        match self.provider.resolve_place(suggestion_id).await? {
            Some(location) if geo::is_valid(location.coordinate) => Ok(location),
            Some(location) => Err(SyncError::ProviderLookupFailed(format!(
                "out-of-range coordinate for suggestion {suggestion_id}: {:?}",
                location.coordinate
            ))),
            None => Err(SyncError::ProviderLookupFailed(format!(
                "no match for suggestion {suggestion_id}"
            ))),
        }
    }
}

impl Drop for PlaceSearchDebouncer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_debounce(
    provider: Arc<dyn PlaceSearchProvider>,
    debounce: Duration,
    mut query_rx: mpsc::UnboundedReceiver<String>,
    results_tx: watch::Sender<SearchResults>,
    metrics: Metrics,
) {
    let mut next_seq: u64 = 0;
    let mut pending: Option<String> = None;

    loop {
        tokio::select! {
            maybe = query_rx.recv() => {
                match maybe {
                    Some(text) => {
                        if text.is_empty() {
                            // Empty input clears immediately, skips the
                            // provider, and supersedes anything in flight.
                            pending = None;
                            next_seq += 1;
                            apply(&results_tx, &metrics, next_seq, String::new(), Vec::new());
                        } else {
                            pending = Some(text);
                        }
                    }
                    None => break,
                }
            }
            // Recreated each iteration, so any new input restarts the
            // window (trailing-edge debounce).
            _ = tokio::time::sleep(debounce), if pending.is_some() => {
                let query = pending.take().expect("pending query");
                next_seq += 1;
                let seq = next_seq;

                let provider = provider.clone();
                let results_tx = results_tx.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    match provider.search_places(&query).await {
                        Ok(suggestions) => {
                            apply(&results_tx, &metrics, seq, query, suggestions);
                        }
                        Err(err) => {
                            metrics.provider_errors_total.inc();
                            warn!(error = %err, query, "place search failed");
                        }
                    }
                });
            }
        }
    }
}

fn apply(
    results_tx: &watch::Sender<SearchResults>,
    metrics: &Metrics,
    seq: u64,
    query: String,
    suggestions: Vec<PlaceSuggestion>,
) {
    let mut applied = false;
    results_tx.send_if_modified(|current| {
        if seq >= current.seq {
            *current = SearchResults {
                seq,
                query,
                suggestions,
            };
            applied = true;
            true
        } else {
            false
        }
    });

    if !applied {
        metrics.stale_responses_discarded_total.inc();
        debug!(seq, "discarded stale search response");
    }
}
