//! Core wire types shared by the scout gateway crates.
//!
//! One inbound frame kind ([`EnrichmentRequest`]) and one outbound frame
//! kind ([`EnrichmentResult`], success or failure). Nothing here touches
//! the network; this crate is pure data.

mod fallback;
mod types;

pub use fallback::fallback_payload;
pub use types::{
    Enrichment, EnrichmentFailure, EnrichmentPayload, EnrichmentRequest, EnrichmentResponse,
    EnrichmentResult, Identification, PriceEstimate,
};
