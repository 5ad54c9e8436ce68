use std::collections::HashMap;

use tracing::trace;

pub const CONTENT_LENGTH_HEADER: &str = "content-length";

/// A request observed between its start and terminal events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub tab_id: i64,
    pub method: String,
    pub endpoint: String,
    pub size_bytes: Option<u64>,
}

/// In-flight request table keyed by the host's per-session request id.
///
/// Lives for the process lifetime and is never persisted. Entries whose
/// terminal event never arrives (cancelled navigations and the like) stay in
/// the table; they are not swept.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, PendingRequest>,
}

impl Correlator {
    /// Tracks a request that passed upstream filtering. At most one entry per
    /// request id; the host never reuses an id while a request is pending, so
    /// a re-insert simply replaces.
    pub fn track(&mut self, request_id: &str, request: PendingRequest) {
        trace!(
            request_id,
            tab_id = request.tab_id,
            endpoint = %request.endpoint,
            "tracking request"
        );
        self.pending.insert(request_id.to_owned(), request);
    }

    /// Fills in the response size from a headers event. Missing entry means
    /// the request was never tracked or the events raced; both are expected
    /// and ignored. A missing or unparseable length header leaves the size
    /// unknown.
    pub fn record_headers(&mut self, request_id: &str, headers: &[(String, String)]) {
        let Some(request) = self.pending.get_mut(request_id) else {
            return;
        };
        if let Some(size) = content_length(headers) {
            request.size_bytes = Some(size);
        }
    }

    /// Removes and returns the pending entry. Each entry is consumed exactly
    /// once; a second terminal event for the same id finds nothing.
    pub fn take(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.pending.remove(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn content_length(headers: &[(String, String)]) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_LENGTH_HEADER))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
}
