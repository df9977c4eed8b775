pub mod rest;
pub mod types;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::place::ResolvedLocation;
use crate::models::ride::{Coordinate, Ride};
use crate::api::types::FareEstimate;

/// The REST backend as seen by the lifecycle controller.
///
/// Injected so the workflow can run against a fake in tests; the real
/// implementation is [`rest::HttpRideApi`].
#[async_trait]
pub trait RideApi: Send + Sync {
    async fn estimate_fare(
        &self,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<FareEstimate, SyncError>;

    async fn request_ride(
        &self,
        pickup: &ResolvedLocation,
        destination: &ResolvedLocation,
    ) -> Result<Ride, SyncError>;

    async fn accept_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError>;
    async fn start_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError>;
    async fn complete_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError>;
    async fn cancel_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError>;

    async fn ride_history(&self) -> Result<Vec<Ride>, SyncError>;
}
