use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::place::ResolvedLocation;
use crate::models::ride::{Coordinate, Ride, RideStatus};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct FareEstimate {
    pub fare_amount: f64,
    pub estimated_distance_km: f64,
}

#[derive(Debug, Serialize)]
pub struct FareEstimateBody {
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
}

impl FareEstimateBody {
    pub fn new(pickup: Coordinate, destination: Coordinate) -> Self {
        Self {
            pickup_latitude: pickup.lat,
            pickup_longitude: pickup.lng,
            destination_latitude: destination.lat,
            destination_longitude: destination.lng,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RideRequestBody {
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: String,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub destination_address: String,
}

impl RideRequestBody {
    pub fn new(pickup: &ResolvedLocation, destination: &ResolvedLocation) -> Self {
        Self {
            pickup_latitude: pickup.coordinate.lat,
            pickup_longitude: pickup.coordinate.lng,
            pickup_address: pickup.address.clone(),
            destination_latitude: destination.coordinate.lat,
            destination_longitude: destination.coordinate.lng,
            destination_address: destination.address.clone(),
        }
    }
}

/// Ride as the backend serializes it: flat snake_case coordinate fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideBody {
    pub id: Uuid,
    pub status: RideStatus,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: String,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub destination_address: String,
    pub fare_amount: f64,
    pub driver_id: Option<Uuid>,
    pub passenger_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

impl From<RideBody> for Ride {
    fn from(body: RideBody) -> Self {
        Ride {
            id: body.id,
            status: body.status,
            pickup: ResolvedLocation {
                address: body.pickup_address,
                coordinate: Coordinate {
                    lat: body.pickup_latitude,
                    lng: body.pickup_longitude,
                },
            },
            destination: ResolvedLocation {
                address: body.destination_address,
                coordinate: Coordinate {
                    lat: body.destination_latitude,
                    lng: body.destination_longitude,
                },
            },
            fare_amount: body.fare_amount,
            driver_id: body.driver_id,
            passenger_id: body.passenger_id,
            requested_at: body.requested_at,
        }
    }
}
