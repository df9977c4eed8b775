use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::place::ResolvedLocation;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Position in the normal progression. Cancelled sits outside the
    /// order and is handled separately.
    fn rank(self) -> u8 {
        match self {
            RideStatus::Requested => 0,
            RideStatus::Accepted => 1,
            RideStatus::InProgress => 2,
            RideStatus::Completed => 3,
            RideStatus::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Whether a ride currently in `self` may move to `next`.
    ///
    /// Forward moves along Requested < Accepted < InProgress < Completed
    /// are allowed, including skips (a REST response can outrun the push
    /// event for an intermediate status). Cancelled is reachable from
    /// Requested or Accepted only. Anything else is a regression.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            RideStatus::Cancelled => {
                matches!(self, RideStatus::Requested | RideStatus::Accepted)
            }
            _ => next.rank() > self.rank(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub status: RideStatus,
    pub pickup: ResolvedLocation,
    pub destination: ResolvedLocation,
    pub fare_amount: f64,
    pub driver_id: Option<Uuid>,
    pub passenger_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub driver_id: Uuid,
    pub coordinate: Coordinate,
    pub updated_at: DateTime<Utc>,
}
