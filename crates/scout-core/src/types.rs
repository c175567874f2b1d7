//! Inbound/outbound frame types and the provider payload shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One detection crop submitted for enrichment.
///
/// Decoding is strict: a frame with missing, extra, or wrong-typed fields
/// is rejected as a whole. `trackId` correlates the eventual response; it
/// is unique among concurrently in-flight requests but may repeat over the
/// lifetime of a connection.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentRequest {
    /// Upstream tracker identifier.
    #[serde(rename = "trackId")]
    pub track_id: i64,
    /// Free-text classifier hint (e.g. a YOLO class name).
    pub label: String,
    /// Detector confidence. Informational only.
    pub confidence: f64,
    /// Base64-encoded image bytes of the crop.
    #[serde(rename = "cropBase64")]
    pub crop_base64: String,
}

/// What the object is.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Identification {
    pub name: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub color: String,
    pub category: String,
    pub description: String,
}

/// Rough price band for the identified object.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PriceEstimate {
    pub range_low: String,
    pub range_high: String,
    pub currency: String,
    pub note: String,
}

/// Descriptive and pricing data produced alongside the identification.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Enrichment {
    pub summary: String,
    pub price_estimate: PriceEstimate,
    pub specs: BTreeMap<String, String>,
    pub search_query: String,
}

/// The structured shape the provider must return: identification plus
/// enrichment. Missing either key is a content-format failure upstream.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EnrichmentPayload {
    pub identification: Identification,
    pub enrichment: Enrichment,
}

/// Successful outbound frame, correlated by `trackId`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnrichmentResponse {
    #[serde(rename = "trackId")]
    pub track_id: i64,
    #[serde(flatten)]
    pub payload: EnrichmentPayload,
}

/// Failure outbound frame: `{"error": true, "trackId": n}`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnrichmentFailure {
    pub error: bool,
    #[serde(rename = "trackId")]
    pub track_id: i64,
}

/// The single outbound message kind: success payload or error marker.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum EnrichmentResult {
    Success(EnrichmentResponse),
    Failure(EnrichmentFailure),
}

impl EnrichmentResult {
    /// Success frame for `track_id` carrying `payload`.
    pub fn success(track_id: i64, payload: EnrichmentPayload) -> Self {
        Self::Success(EnrichmentResponse { track_id, payload })
    }

    /// Error marker for `track_id`.
    pub fn failure(track_id: i64) -> Self {
        Self::Failure(EnrichmentFailure {
            error: true,
            track_id,
        })
    }

    /// The `trackId` this result correlates to.
    pub fn track_id(&self) -> i64 {
        match self {
            Self::Success(r) => r.track_id,
            Self::Failure(f) => f.track_id,
        }
    }
}
