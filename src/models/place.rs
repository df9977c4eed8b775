use serde::{Deserialize, Serialize};

use crate::models::ride::Coordinate;

/// One autocomplete hit from the search provider. Ephemeral; only the id
/// is ever sent back to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSuggestion {
    pub id: String,
    pub primary_text: String,
    pub secondary_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub address: String,
    pub coordinate: Coordinate,
}
