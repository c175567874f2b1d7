//! Request processor: one provider call per request with a bounded
//! retry-then-fallback policy, producing exactly zero or one outbound frame.

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scout_core::{EnrichmentPayload, EnrichmentRequest, EnrichmentResult, fallback_payload};
use scout_llm::{ProviderError, VisionProvider};

/// One initial attempt plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// Outcome of a single provider call, as seen by the retry policy.
enum CallOutcome {
    /// Validated payload, forwarded verbatim.
    Success(EnrichmentPayload),
    /// Content-format failure: the one class the policy retries.
    Retryable,
    /// Anything else; not retried, surfaced as an error marker.
    Fatal,
}

fn classify(result: Result<EnrichmentPayload, ProviderError>, track_id: i64) -> CallOutcome {
    match result {
        Ok(payload) => CallOutcome::Success(payload),
        Err(e) if e.is_content_format() => {
            warn!(track_id, error = %e, "provider output failed validation");
            CallOutcome::Retryable
        }
        Err(e) => {
            warn!(track_id, kind = e.kind(), error = %e, "provider call failed");
            CallOutcome::Fatal
        }
    }
}

/// Process one request to completion.
///
/// Writes at most one frame to `out`. Cancellation is cooperative: checked
/// while the provider call is outstanding, before the retry, and before the
/// write. A send failure means the connection closed underneath us, which
/// is expected and suppressed.
pub(crate) async fn process_request(
    provider: &dyn VisionProvider,
    request: EnrichmentRequest,
    out: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) {
    let track_id = request.track_id;

    let mut hard_failure = false;
    let mut payload: Option<EnrichmentPayload> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let call = provider.enrich(&request.crop_base64, &request.label);
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                debug!(track_id, "cancelled while provider call outstanding");
                return;
            }
            result = call => classify(result, track_id),
        };

        match outcome {
            CallOutcome::Success(p) => {
                payload = Some(p);
                break;
            }
            CallOutcome::Retryable if attempt < MAX_ATTEMPTS => {
                if cancel.is_cancelled() {
                    debug!(track_id, "cancelled before retry");
                    return;
                }
                debug!(track_id, attempt, "retrying after content-format failure");
            }
            CallOutcome::Retryable => {
                // Second format failure: deterministic fallback, never an error.
                counter!("enrich_fallbacks_total").increment(1);
                payload = Some(fallback_payload(&request.label));
            }
            CallOutcome::Fatal => {
                counter!("enrich_hard_failures_total").increment(1);
                hard_failure = true;
                break;
            }
        }
    }

    let result = if hard_failure {
        EnrichmentResult::failure(track_id)
    } else {
        match payload {
            Some(p) => EnrichmentResult::success(track_id, p),
            // Unreachable: the loop always sets payload or hard_failure.
            None => EnrichmentResult::failure(track_id),
        }
    };

    if cancel.is_cancelled() {
        debug!(track_id, "cancelled before write, dropping result");
        return;
    }

    let frame = match serde_json::to_string(&result) {
        Ok(json) => json,
        Err(e) => {
            warn!(track_id, error = %e, "failed to serialize result");
            return;
        }
    };
    if out.send(frame).await.is_err() {
        debug!(track_id, "connection closed before response could be sent");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
