//! Deterministic fallback payload used when the provider cannot produce a
//! valid structured result after the retry.

use std::collections::BTreeMap;

use crate::types::{Enrichment, EnrichmentPayload, Identification, PriceEstimate};

/// Build the minimal payload derived solely from the detector label.
///
/// Pure function: same label in, same payload out. The peer receives this
/// instead of an error when the provider's output repeatedly failed to
/// parse into the expected shape.
pub fn fallback_payload(label: &str) -> EnrichmentPayload {
    EnrichmentPayload {
        identification: Identification {
            name: label.to_string(),
            brand: None,
            model: None,
            color: "unknown".into(),
            category: label.to_string(),
            description: label.to_string(),
        },
        enrichment: Enrichment {
            summary: String::new(),
            price_estimate: PriceEstimate {
                range_low: String::new(),
                range_high: String::new(),
                currency: "USD".into(),
                note: String::new(),
            },
            specs: BTreeMap::new(),
            search_query: label.to_string(),
        },
    }
}
