use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::{
    classify::ClassifierCache,
    config::SettingsSource,
    correlate::{Correlator, PendingRequest},
    normalize::normalize_endpoint,
    store::{AggregationStore, TableStore, TerminalStatus},
};

const DEFAULT_METHOD: &str = "GET";

/// Event ingestion boundary: the four lifecycle entry points the host's
/// network-event subscription calls, plus tab closure.
///
/// Settings are loaded from the source once per event, so hot updates apply
/// on the next event. The correlator's no-op on unknown request ids is the
/// only ordering safeguard needed; headers and terminal events may arrive
/// for requests that were never tracked.
pub struct NetworkObserver {
    settings: Arc<dyn SettingsSource>,
    classifiers: ClassifierCache,
    correlator: Mutex<Correlator>,
    store: AggregationStore,
}

impl NetworkObserver {
    pub fn new(settings: Arc<dyn SettingsSource>, table_store: Arc<dyn TableStore>) -> Self {
        Self {
            settings,
            classifiers: ClassifierCache::default(),
            correlator: Mutex::new(Correlator::default()),
            store: AggregationStore::new(table_store),
        }
    }

    /// Read access for the presentation layer.
    pub fn store(&self) -> &AggregationStore {
        &self.store
    }

    /// Host notification: a request is about to start. Starts tracking it
    /// when its resource type is captured, it is attributable to a tab, and
    /// its normalized endpoint classifies as API traffic; otherwise nothing
    /// is recorded.
    pub async fn request_will_start(
        &self,
        request_id: &str,
        tab_id: i64,
        method: Option<&str>,
        url: &str,
        resource_type: &str,
    ) -> anyhow::Result<()> {
        let settings = self.settings.load().await?;
        let capture = &settings.capture;

        if !capture.captured_request_types.contains(resource_type) {
            return Ok(());
        }
        if tab_id < 0 {
            debug!(request_id, tab_id, "request not attributable to a tab");
            return Ok(());
        }

        let endpoint = normalize_endpoint(url, capture.include_query_string);
        let classifier = self
            .classifiers
            .classifier_for(&capture.include_patterns, &capture.exclude_patterns);
        if !classifier.is_api_endpoint(&endpoint) {
            return Ok(());
        }

        let method = method.unwrap_or(DEFAULT_METHOD).to_owned();
        self.correlator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .track(
                request_id,
                PendingRequest {
                    tab_id,
                    method,
                    endpoint,
                    size_bytes: None,
                },
            );
        Ok(())
    }

    /// Host notification: response headers arrived. Enriches the pending
    /// entry with the content length, if any.
    pub fn headers_received(&self, request_id: &str, response_headers: &[(String, String)]) {
        self.correlator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record_headers(request_id, response_headers);
    }

    /// Host notification: the request completed. An absent status code is
    /// recorded as "outcome unknown".
    pub async fn request_completed(
        &self,
        request_id: &str,
        status_code: Option<u16>,
    ) -> anyhow::Result<()> {
        self.finish(request_id, status_code.map(TerminalStatus::Code))
            .await
    }

    /// Host notification: the request failed at the network level. The
    /// underlying error detail does not matter; the record gets the `ERR`
    /// sentinel either way.
    pub async fn request_errored(&self, request_id: &str) -> anyhow::Result<()> {
        self.finish(request_id, Some(TerminalStatus::NetworkError))
            .await
    }

    /// Host notification: the tab closed; its table goes with it.
    pub async fn tab_closed(&self, tab_id: i64) -> anyhow::Result<()> {
        self.store.remove(tab_id).await
    }

    async fn finish(
        &self,
        request_id: &str,
        status: Option<TerminalStatus>,
    ) -> anyhow::Result<()> {
        // Taking the entry before anything that can fail makes consumption
        // exactly-once: a failed upsert loses one update, never leaks the
        // pending entry.
        let taken = self
            .correlator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take(request_id);
        let Some(pending) = taken else {
            return Ok(());
        };

        let settings = self.settings.load().await?;
        let result = self
            .store
            .upsert(
                pending.tab_id,
                &pending.method,
                &pending.endpoint,
                status,
                pending.size_bytes,
                settings.capture.max_records_per_tab,
            )
            .await;
        if let Err(err) = &result {
            warn!(
                request_id,
                tab_id = pending.tab_id,
                endpoint = %pending.endpoint,
                error = %err,
                "failed to persist endpoint record"
            );
        }
        result
    }
}
