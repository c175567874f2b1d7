//! Enrichment provider boundary.
//!
//! The gateway treats the reasoning provider as an opaque async call:
//! [`VisionProvider::enrich`] takes a base64 crop and a detector label and
//! either returns a validated [`scout_core::EnrichmentPayload`] or one of
//! the [`ProviderError`] classes the retry policy distinguishes.

mod anthropic;
mod prompt;
mod provider;

pub use anthropic::{AnthropicConfig, AnthropicVisionProvider};
pub use prompt::prompt_for_label;
pub use provider::{ProviderError, ProviderResult, VisionProvider};
