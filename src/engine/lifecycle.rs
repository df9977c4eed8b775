use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::types::FareEstimate;
use crate::api::RideApi;
use crate::error::SyncError;
use crate::geo;
use crate::models::place::ResolvedLocation;
use crate::models::ride::{Coordinate, Ride, RideStatus};
use crate::observability::metrics::Metrics;
use crate::realtime::{driver_location_topic, ride_update_topic, RealtimeChannel};
use crate::state::{RideStateStore, StatusChange};

/// Status change pushed on `ride_<id>_update`.
#[derive(Debug, Deserialize)]
struct RideUpdateEvent {
    status: RideStatus,
    #[serde(default)]
    driver_id: Option<Uuid>,
}

/// Position pushed on `driver_<id>_location`.
#[derive(Debug, Deserialize)]
struct DriverLocationEvent {
    latitude: f64,
    longitude: f64,
}

/// Sequences the passenger/driver workflow: REST calls applied
/// optimistically from their own responses, realtime subscriptions as the
/// source of truth for the other party's transitions, everything
/// reconciled through the store's lifecycle order.
pub struct RideLifecycleController {
    api: Arc<dyn RideApi>,
    store: Arc<RideStateStore>,
    realtime: Arc<RealtimeChannel>,
    metrics: Metrics,
}

impl RideLifecycleController {
    pub fn new(
        api: Arc<dyn RideApi>,
        store: Arc<RideStateStore>,
        realtime: Arc<RealtimeChannel>,
        metrics: Metrics,
    ) -> Self {
        Self {
            api,
            store,
            realtime,
            metrics,
        }
    }

    /// Pure query; mutates nothing.
    pub async fn estimate_fare(
        &self,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<FareEstimate, SyncError> {
        let estimate = self.api.estimate_fare(pickup, destination).await?;
        debug!(
            fare = estimate.fare_amount,
            distance_km = estimate.estimated_distance_km,
            "fare estimated"
        );
        Ok(estimate)
    }

    pub async fn request_ride(
        &self,
        pickup: &ResolvedLocation,
        destination: &ResolvedLocation,
    ) -> Result<Ride, SyncError> {
        let ride = self.api.request_ride(pickup, destination).await?;
        info!(
            ride_id = %ride.id,
            fare = ride.fare_amount,
            distance_km = geo::haversine_km(pickup.coordinate, destination.coordinate),
            "ride requested"
        );

        self.store.set_current_ride(ride.clone());
        watch_ride_updates(&self.realtime, self.store.clone(), ride.id);
        if let Some(driver_id) = ride.driver_id {
            watch_driver(&self.realtime, self.store.clone(), driver_id);
        }

        Ok(ride)
    }

    /// Driver-side acceptance. Subscribes to the accepting driver's
    /// location topic once the backend confirms.
    pub async fn accept_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ensure_transition(ride_id, RideStatus::Accepted)?;
        let ride = self.api.accept_ride(ride_id).await?;

        if let Some(driver_id) = ride.driver_id {
            self.store.assign_driver(driver_id);
            watch_driver(&self.realtime, self.store.clone(), driver_id);
        }
        self.apply_rest_status(&ride);
        info!(ride_id = %ride.id, "ride accepted");
        Ok(ride)
    }

    pub async fn start_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ensure_transition(ride_id, RideStatus::InProgress)?;
        let ride = self.api.start_ride(ride_id).await?;
        self.apply_rest_status(&ride);
        info!(ride_id = %ride.id, "ride started");
        Ok(ride)
    }

    pub async fn complete_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ensure_transition(ride_id, RideStatus::Completed)?;
        let ride = self.api.complete_ride(ride_id).await?;
        self.apply_rest_status(&ride);
        self.release_ride(ride_id);
        info!(ride_id = %ride.id, fare = ride.fare_amount, "ride completed");
        Ok(ride)
    }

    pub async fn cancel_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ensure_transition(ride_id, RideStatus::Cancelled)?;
        let ride = self.api.cancel_ride(ride_id).await?;
        self.apply_rest_status(&ride);
        self.release_ride(ride_id);
        info!(ride_id = %ride.id, "ride cancelled");
        Ok(ride)
    }

    /// Pure query; past rides as the backend reports them.
    pub async fn ride_history(&self) -> Result<Vec<Ride>, SyncError> {
        self.api.ride_history().await
    }

    /// Driver-side: best-effort broadcast of the current position onto
    /// the active ride's driver topic. No delivery guarantee.
    pub fn publish_location(&self, coordinate: Coordinate) {
        if !geo::is_valid(coordinate) {
            debug!(?coordinate, "not publishing out-of-range coordinate");
            return;
        }
        let Some(driver_id) = self.store.current_ride().and_then(|ride| ride.driver_id) else {
            debug!("no active ride with a driver; location not published");
            return;
        };

        self.realtime.publish(
            driver_location_topic(driver_id),
            serde_json::json!({
                "latitude": coordinate.lat,
                "longitude": coordinate.lng,
            }),
        );
    }

    /// Tears down tracking on navigation away: topics unsubscribed, local
    /// ride dropped. The realtime connection itself stays with its owner.
    pub fn detach(&self) {
        if let Some(ride) = self.store.current_ride() {
            self.release_ride(ride.id);
        }
    }

    /// Validates an intended transition against the current local status
    /// before any REST call goes out. A rejected transition leaves both
    /// the backend and the store untouched.
    fn ensure_transition(&self, ride_id: Uuid, target: RideStatus) -> Result<(), SyncError> {
        let ride = self.store.current_ride().ok_or(SyncError::NoActiveRide)?;
        if ride.id != ride_id {
            return Err(SyncError::NoActiveRide);
        }
        if ride.status == target || ride.status.can_transition_to(target) {
            return Ok(());
        }

        self.metrics.lifecycle_inconsistencies_total.inc();
        warn!(
            ride_id = %ride_id,
            from = ?ride.status,
            to = ?target,
            "refusing lifecycle call out of order"
        );
        Err(SyncError::LifecycleInconsistency {
            from: ride.status,
            to: target,
        })
    }

    /// Optimistic local apply from our own call's response. A response
    /// superseded by a newer pushed status is tolerated as stale, not an
    /// error; the store already logged and counted the rejection.
    fn apply_rest_status(&self, ride: &Ride) {
        match self.store.update_status(ride.status, "rest") {
            Ok(_) => {}
            Err(SyncError::NoActiveRide) => {
                debug!(ride_id = %ride.id, "response arrived after ride was cleared");
            }
            Err(_) => {
                debug!(ride_id = %ride.id, status = ?ride.status, "response superseded by newer status");
            }
        }
    }

    fn release_ride(&self, ride_id: Uuid) {
        let driver_id = self.store.current_ride().and_then(|ride| ride.driver_id);
        self.realtime.unsubscribe(&ride_update_topic(ride_id));
        if let Some(driver_id) = driver_id {
            self.realtime.unsubscribe(&driver_location_topic(driver_id));
        }
        self.store.clear_current_ride();
    }
}

/// Routes `ride_<id>_update` events into the store. A pushed terminal
/// status from the other party releases the ride the same way a local
/// complete/cancel does.
fn watch_ride_updates(realtime: &Arc<RealtimeChannel>, store: Arc<RideStateStore>, ride_id: Uuid) {
    let channel = realtime.clone();
    realtime.subscribe(ride_update_topic(ride_id), move |payload| {
        let event: RideUpdateEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, ride_id = %ride_id, "malformed ride update event");
                return;
            }
        };

        if let Some(driver_id) = event.driver_id {
            let unassigned = store
                .current_ride()
                .map(|ride| ride.id == ride_id && ride.driver_id.is_none())
                .unwrap_or(false);
            if unassigned {
                store.assign_driver(driver_id);
                watch_driver(&channel, store.clone(), driver_id);
            }
        }

        match store.update_status(event.status, "realtime") {
            Ok(StatusChange::Applied) if event.status.is_terminal() => {
                let driver_id = store.current_ride().and_then(|ride| ride.driver_id);
                channel.unsubscribe(&ride_update_topic(ride_id));
                if let Some(driver_id) = driver_id {
                    channel.unsubscribe(&driver_location_topic(driver_id));
                }
                store.clear_current_ride();
            }
            Ok(_) => {}
            Err(SyncError::NoActiveRide) => {
                debug!(ride_id = %ride_id, "event arrived after ride was cleared");
            }
            // Out-of-order events are rejected and counted by the store.
            Err(_) => {}
        }
    });
}

/// Routes `driver_<id>_location` events into the store; the store drops
/// updates once the ride is finished or if the driver does not match.
fn watch_driver(realtime: &Arc<RealtimeChannel>, store: Arc<RideStateStore>, driver_id: Uuid) {
    realtime.subscribe(driver_location_topic(driver_id), move |payload| {
        let event: DriverLocationEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, %driver_id, "malformed driver location event");
                return;
            }
        };

        store.set_driver_location(
            driver_id,
            Coordinate {
                lat: event.latitude,
                lng: event.longitude,
            },
        );
        if let Some(distance_km) = store.driver_distance_km() {
            debug!(%driver_id, distance_km, "driver position updated");
        }
    });
}
