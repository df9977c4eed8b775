use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::api::types::{FareEstimate, FareEstimateBody, RideBody, RideRequestBody};
use crate::api::RideApi;
use crate::error::SyncError;
use crate::models::place::ResolvedLocation;
use crate::models::ride::{Coordinate, Ride};

/// REST client for the ride backend. Carries the bearer token it was
/// constructed with; token issuance happens elsewhere.
pub struct HttpRideApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpRideApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SyncError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| SyncError::TransportUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| SyncError::Internal(format!("malformed response body: {err}")))
    }

    async fn ride_action(&self, ride_id: Uuid, action: &str) -> Result<Ride, SyncError> {
        debug!(%ride_id, action, "issuing ride lifecycle call");
        let body: RideBody = self
            .send(self.client.post(self.url(&format!("/api/rides/{ride_id}/{action}"))))
            .await?;
        Ok(body.into())
    }
}

#[async_trait]
impl RideApi for HttpRideApi {
    async fn estimate_fare(
        &self,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<FareEstimate, SyncError> {
        self.send(
            self.client
                .post(self.url("/api/rides/estimate"))
                .json(&FareEstimateBody::new(pickup, destination)),
        )
        .await
    }

    async fn request_ride(
        &self,
        pickup: &ResolvedLocation,
        destination: &ResolvedLocation,
    ) -> Result<Ride, SyncError> {
        let body: RideBody = self
            .send(
                self.client
                    .post(self.url("/api/rides"))
                    .json(&RideRequestBody::new(pickup, destination)),
            )
            .await?;
        Ok(body.into())
    }

    async fn accept_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ride_action(ride_id, "accept").await
    }

    async fn start_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ride_action(ride_id, "start").await
    }

    async fn complete_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ride_action(ride_id, "complete").await
    }

    async fn cancel_ride(&self, ride_id: Uuid) -> Result<Ride, SyncError> {
        self.ride_action(ride_id, "cancel").await
    }

    async fn ride_history(&self) -> Result<Vec<Ride>, SyncError> {
        let bodies: Vec<RideBody> = self
            .send(self.client.get(self.url("/api/rides/history")))
            .await?;
        Ok(bodies.into_iter().map(Ride::from).collect())
    }
}
