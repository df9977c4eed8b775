use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::geo;
use crate::models::ride::{Coordinate, DriverLocation, Ride, RideStatus};
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied,
    /// The ride already carries the target status. Re-applying is a no-op
    /// so a REST response and its realtime echo can both land safely.
    AlreadyCurrent,
}

/// The client's single view of the active ride.
///
/// Mutated only through the methods below; observers watch complete
/// snapshots, never partial updates. The store is the one place the
/// lifecycle order is enforced, so both REST responses and push events
/// funnel through `update_status`.
pub struct RideStateStore {
    ride_tx: watch::Sender<Option<Ride>>,
    driver_tx: watch::Sender<Option<DriverLocation>>,
    write_lock: Mutex<()>,
    metrics: Metrics,
}

impl RideStateStore {
    pub fn new(metrics: Metrics) -> Self {
        let (ride_tx, _) = watch::channel(None);
        let (driver_tx, _) = watch::channel(None);

        Self {
            ride_tx,
            driver_tx,
            write_lock: Mutex::new(()),
            metrics,
        }
    }

    pub fn set_current_ride(&self, ride: Ride) {
        let _guard = self.write_lock.lock().expect("state lock");
        self.driver_tx.send_replace(None);
        self.ride_tx.send_replace(Some(ride));
    }

    /// Applies a status transition if the lifecycle order allows it.
    ///
    /// `source` labels the metrics series: "rest" for the local user's own
    /// call responses, "realtime" for pushed events from the other party.
    pub fn update_status(
        &self,
        new_status: RideStatus,
        source: &'static str,
    ) -> Result<StatusChange, SyncError> {
        let _guard = self.write_lock.lock().expect("state lock");

        let current = match self.ride_tx.borrow().as_ref() {
            Some(ride) => ride.status,
            None => return Err(SyncError::NoActiveRide),
        };

        if current == new_status {
            return Ok(StatusChange::AlreadyCurrent);
        }

        if !current.can_transition_to(new_status) {
            self.metrics.lifecycle_inconsistencies_total.inc();
            warn!(
                from = ?current,
                to = ?new_status,
                source,
                "rejected out-of-order status transition"
            );
            return Err(SyncError::LifecycleInconsistency {
                from: current,
                to: new_status,
            });
        }

        self.ride_tx.send_modify(|ride| {
            if let Some(ride) = ride.as_mut() {
                ride.status = new_status;
            }
        });
        self.metrics
            .status_updates_total
            .with_label_values(&[source])
            .inc();

        Ok(StatusChange::Applied)
    }

    /// Records the driver assigned by the backend, if any.
    pub fn assign_driver(&self, driver_id: Uuid) {
        let _guard = self.write_lock.lock().expect("state lock");
        self.ride_tx.send_modify(|ride| {
            if let Some(ride) = ride.as_mut() {
                ride.driver_id = Some(driver_id);
            }
        });
    }

    pub fn clear_current_ride(&self) {
        let _guard = self.write_lock.lock().expect("state lock");
        self.ride_tx.send_replace(None);
        self.driver_tx.send_replace(None);
    }

    pub fn current_ride(&self) -> Option<Ride> {
        self.ride_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Ride>> {
        self.ride_tx.subscribe()
    }

    pub fn updates(&self) -> WatchStream<Option<Ride>> {
        WatchStream::new(self.ride_tx.subscribe())
    }

    /// Overwrites the driver's last known position.
    ///
    /// Accepted only while a ride with a matching driver is active; a late
    /// update for a finished ride or a stranger's position is dropped.
    pub fn set_driver_location(&self, driver_id: Uuid, coordinate: Coordinate) {
        if !geo::is_valid(coordinate) {
            debug!(%driver_id, ?coordinate, "dropping out-of-range driver coordinate");
            return;
        }

        let _guard = self.write_lock.lock().expect("state lock");

        let accepts = match self.ride_tx.borrow().as_ref() {
            Some(ride) => ride.driver_id == Some(driver_id) && !ride.status.is_terminal(),
            None => false,
        };
        if !accepts {
            debug!(%driver_id, "ignoring driver location without a matching active ride");
            return;
        }

        self.driver_tx.send_replace(Some(DriverLocation {
            driver_id,
            coordinate,
            updated_at: Utc::now(),
        }));
    }

    pub fn driver_location(&self) -> Option<DriverLocation> {
        *self.driver_tx.borrow()
    }

    pub fn subscribe_driver_location(&self) -> watch::Receiver<Option<DriverLocation>> {
        self.driver_tx.subscribe()
    }

    /// Distance from the driver's last known position to the pickup point.
    pub fn driver_distance_km(&self) -> Option<f64> {
        let driver = (*self.driver_tx.borrow())?;
        let pickup = self.ride_tx.borrow().as_ref()?.pickup.coordinate;
        Some(geo::haversine_km(driver.coordinate, pickup))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{RideStateStore, StatusChange};
    use crate::error::SyncError;
    use crate::models::place::ResolvedLocation;
    use crate::models::ride::{Coordinate, Ride, RideStatus};
    use crate::observability::metrics::Metrics;

    fn location(lat: f64, lng: f64) -> ResolvedLocation {
        ResolvedLocation {
            address: "somewhere".to_string(),
            coordinate: Coordinate { lat, lng },
        }
    }

    fn ride(status: RideStatus, driver_id: Option<Uuid>) -> Ride {
        Ride {
            id: Uuid::new_v4(),
            status,
            pickup: location(40.0, -74.0),
            destination: location(40.1, -74.1),
            fare_amount: 12.5,
            driver_id,
            passenger_id: Uuid::new_v4(),
            requested_at: Utc::now(),
        }
    }

    fn store() -> RideStateStore {
        RideStateStore::new(Metrics::new())
    }

    #[test]
    fn update_without_a_ride_fails() {
        let store = store();
        let err = store.update_status(RideStatus::Accepted, "rest").unwrap_err();
        assert!(matches!(err, SyncError::NoActiveRide));
    }

    #[test]
    fn forward_transition_is_applied() {
        let store = store();
        store.set_current_ride(ride(RideStatus::Requested, None));

        let change = store.update_status(RideStatus::Accepted, "realtime").unwrap();
        assert_eq!(change, StatusChange::Applied);
        assert_eq!(store.current_ride().unwrap().status, RideStatus::Accepted);
    }

    #[test]
    fn duplicate_status_is_a_noop() {
        let store = store();
        store.set_current_ride(ride(RideStatus::Accepted, None));

        let change = store.update_status(RideStatus::Accepted, "rest").unwrap();
        assert_eq!(change, StatusChange::AlreadyCurrent);
    }

    #[test]
    fn status_never_regresses() {
        let store = store();
        store.set_current_ride(ride(RideStatus::Requested, None));

        for status in [
            RideStatus::Accepted,
            RideStatus::InProgress,
            RideStatus::Completed,
        ] {
            store.update_status(status, "realtime").unwrap();
        }

        for stale in [RideStatus::Requested, RideStatus::Accepted, RideStatus::InProgress] {
            let err = store.update_status(stale, "realtime").unwrap_err();
            assert!(matches!(err, SyncError::LifecycleInconsistency { .. }));
        }
        assert_eq!(store.current_ride().unwrap().status, RideStatus::Completed);
    }

    #[test]
    fn cancel_from_in_progress_is_rejected_and_state_kept() {
        let store = store();
        store.set_current_ride(ride(RideStatus::InProgress, None));

        let err = store.update_status(RideStatus::Cancelled, "rest").unwrap_err();
        assert!(matches!(
            err,
            SyncError::LifecycleInconsistency {
                from: RideStatus::InProgress,
                to: RideStatus::Cancelled,
            }
        ));
        assert_eq!(store.current_ride().unwrap().status, RideStatus::InProgress);
    }

    #[test]
    fn driver_location_tracks_the_matching_driver_only() {
        let store = store();
        let driver_id = Uuid::new_v4();
        store.set_current_ride(ride(RideStatus::Accepted, Some(driver_id)));

        store.set_driver_location(Uuid::new_v4(), Coordinate { lat: 1.0, lng: 1.0 });
        assert!(store.driver_location().is_none());

        store.set_driver_location(driver_id, Coordinate { lat: 40.05, lng: -74.05 });
        let loc = store.driver_location().unwrap();
        assert_eq!(loc.driver_id, driver_id);
        assert!(store.driver_distance_km().unwrap() < 10.0);
    }

    #[test]
    fn driver_location_after_completion_is_ignored() {
        let store = store();
        let driver_id = Uuid::new_v4();
        store.set_current_ride(ride(RideStatus::Accepted, Some(driver_id)));
        store.update_status(RideStatus::InProgress, "realtime").unwrap();
        store.update_status(RideStatus::Completed, "realtime").unwrap();

        store.set_driver_location(driver_id, Coordinate { lat: 40.2, lng: -74.2 });
        assert!(store.driver_location().is_none());
    }

    #[test]
    fn invalid_coordinates_are_dropped() {
        let store = store();
        let driver_id = Uuid::new_v4();
        store.set_current_ride(ride(RideStatus::Accepted, Some(driver_id)));

        store.set_driver_location(driver_id, Coordinate { lat: 99.0, lng: 0.0 });
        assert!(store.driver_location().is_none());
    }

    #[tokio::test]
    async fn observers_stream_complete_snapshots() {
        use futures::StreamExt;

        let store = store();
        let mut updates = store.updates();
        assert!(updates.next().await.unwrap().is_none());

        store.set_current_ride(ride(RideStatus::Requested, None));
        let snapshot = updates.next().await.unwrap().unwrap();
        assert_eq!(snapshot.status, RideStatus::Requested);

        store.update_status(RideStatus::Accepted, "realtime").unwrap();
        let snapshot = updates.next().await.unwrap().unwrap();
        assert_eq!(snapshot.status, RideStatus::Accepted);
    }

    #[test]
    fn clearing_drops_ride_and_driver_location() {
        let store = store();
        let driver_id = Uuid::new_v4();
        store.set_current_ride(ride(RideStatus::Accepted, Some(driver_id)));
        store.set_driver_location(driver_id, Coordinate { lat: 40.0, lng: -74.0 });

        store.clear_current_ride();
        assert!(store.current_ride().is_none());
        assert!(store.driver_location().is_none());
    }
}
