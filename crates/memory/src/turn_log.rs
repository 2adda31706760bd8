//! Turn log sink that emits one structured tracing record per completed turn.

use async_trait::async_trait;
use ragdesk_core::error::LogSinkError;
use ragdesk_core::feedback::{TurnLogSink, TurnRecord};
use tracing::info;

/// Writes turn records to the `ragdesk::turns` tracing target, where a
/// subscriber can route them to whatever log collector is deployed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTurnLog;

#[async_trait]
impl TurnLogSink for TracingTurnLog {
    async fn record(&self, record: TurnRecord) -> Result<(), LogSinkError> {
        info!(
            target: "ragdesk::turns",
            user_id = %record.user_id,
            session_id = %record.session_id,
            response_id = %record.response_id,
            domains = %record.domains.join(","),
            citations = record.citation_sources.len(),
            degraded = record.degraded,
            had_image_context = record.had_image_context,
            query_chars = record.query.chars().count(),
            response_chars = record.response.chars().count(),
            "Chat turn completed"
        );
        Ok(())
    }
}
