//! Per-connection session dispatcher.
//!
//! One sequential read loop per connection, one writer task owning the
//! outbound sink, and one spawned processor unit per decoded request. Units
//! are tracked in an explicit in-flight registry so teardown can cancel and
//! drain every one of them before the connection is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scout_core::EnrichmentRequest;
use scout_llm::VisionProvider;

use crate::processor;

/// A registered in-flight unit: its cancellation handle plus a serial so a
/// unit whose `trackId` slot was reused does not deregister its successor.
struct UnitEntry {
    unit: u64,
    token: CancellationToken,
}

/// Explicit registry of in-flight processing units for one connection.
///
/// Invariant: empty by the time the session handler returns — every unit
/// deregisters on completion, and teardown drains the stragglers.
pub(crate) struct InFlightRegistry {
    units: DashMap<i64, UnitEntry>,
    next_unit: AtomicU64,
}

impl InFlightRegistry {
    pub(crate) fn new() -> Self {
        Self {
            units: DashMap::new(),
            next_unit: AtomicU64::new(0),
        }
    }

    /// Register a unit for `track_id`, returning its serial. A duplicate
    /// in-flight `trackId` (peer bug) replaces the previous entry; the
    /// superseded unit still drains through the session `JoinSet`.
    pub(crate) fn register(&self, track_id: i64, token: CancellationToken) -> u64 {
        let unit = self.next_unit.fetch_add(1, Ordering::Relaxed);
        if self.units.insert(track_id, UnitEntry { unit, token }).is_some() {
            warn!(track_id, "duplicate in-flight trackId, replacing entry");
        }
        unit
    }

    /// Deregister the unit with serial `unit`, if it still owns the slot.
    pub(crate) fn deregister(&self, track_id: i64, unit: u64) {
        let _ = self.units.remove_if(&track_id, |_, entry| entry.unit == unit);
    }

    /// Signal cancellation to every registered unit.
    pub(crate) fn cancel_all(&self) {
        for entry in self.units.iter() {
            entry.value().token.cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.units.clear();
    }
}

/// Run the session for one accepted WebSocket connection until it closes.
pub(crate) async fn handle_socket(
    socket: WebSocket,
    provider: Arc<dyn VisionProvider>,
    outbound_queue: usize,
) {
    let connection_id = format!("conn_{}", Uuid::now_v7());
    info!(connection_id = %connection_id, "connection opened");

    let (ws_tx, mut ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<String>(outbound_queue);
    let writer = tokio::spawn(write_outbound(ws_tx, out_rx));

    let registry = Arc::new(InFlightRegistry::new());
    let mut units: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(request) = decode_frame(text.as_str()) {
                        spawn_unit(&mut units, &registry, &provider, &out_tx, request);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection_id = %connection_id, "peer closed connection");
                    break;
                }
                // Pings/pongs are handled by axum; binary frames carry nothing we accept.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "transport error, closing session");
                    break;
                }
            },
            // Reap completed units as they finish, in whatever order.
            Some(joined) = units.join_next() => {
                if let Err(e) = joined {
                    warn!(connection_id = %connection_id, error = %e, "processor unit aborted");
                }
            }
        }
    }

    // Teardown: cancel everything still in flight, then wait for all units
    // to finish. No unit touches the socket past this point.
    let in_flight = registry.len();
    registry.cancel_all();
    while let Some(joined) = units.join_next().await {
        if let Err(e) = joined {
            warn!(connection_id = %connection_id, error = %e, "processor unit aborted during drain");
        }
    }
    if !registry.is_empty() {
        warn!(connection_id = %connection_id, remaining = registry.len(), "units left registry entries behind");
        registry.clear();
    }

    info!(connection_id = %connection_id, cancelled = in_flight, "connection closed");
}

/// Decode one inbound text frame. Failures are non-fatal: log, count, and
/// let the caller continue the read loop.
fn decode_frame(text: &str) -> Option<EnrichmentRequest> {
    match serde_json::from_str::<EnrichmentRequest>(text) {
        Ok(request) => {
            counter!("enrich_requests_total").increment(1);
            Some(request)
        }
        Err(e) => {
            counter!("enrich_decode_failures_total").increment(1);
            warn!(error = %e, "dropping malformed frame");
            None
        }
    }
}

/// Register and launch one processor unit without blocking the read loop.
fn spawn_unit(
    units: &mut JoinSet<()>,
    registry: &Arc<InFlightRegistry>,
    provider: &Arc<dyn VisionProvider>,
    out_tx: &mpsc::Sender<String>,
    request: EnrichmentRequest,
) {
    let track_id = request.track_id;
    let token = CancellationToken::new();
    let unit = registry.register(track_id, token.clone());

    let provider = Arc::clone(provider);
    let out = out_tx.clone();
    let registry = Arc::clone(registry);
    let _abort = units.spawn(async move {
        processor::process_request(provider.as_ref(), request, &out, &token).await;
        registry.deregister(track_id, unit);
    });
}

/// Single writer over the shared outbound sink. All frames funnel through
/// one mpsc channel, so concurrent units can never interleave mid-message.
async fn write_outbound(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(frame) = rx.recv().await {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            // Peer is gone; senders will see a closed channel.
            break;
        }
    }
}
