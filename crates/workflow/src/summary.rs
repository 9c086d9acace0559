//! Session-close summary records.

use crate::persist::write_with_retry;
use chrono::Utc;
use concierge_core::profile::{ProfileStore, SessionSummary};
use concierge_memory::{ContextStore, extract};
use tracing::{info, warn};

/// Append an immutable summary of the session to the visitor's profile
/// and merge its topics into the topic list.
///
/// Uses the compaction heuristics; no generation call. Returns the record
/// that was stored, or `None` if the write was dropped.
pub async fn record_session_summary(
    profiles: &dyn ProfileStore,
    visitor: &str,
    session_id: &str,
    store: &ContextStore,
    turns: u64,
) -> Option<SessionSummary> {
    let extraction = extract(store.entries().iter().map(|e| &**e));
    let text = extraction.render(store.exchange_count());
    let topics = extraction.topics.clone();
    let recorded_at = Utc::now();

    let outcome = write_with_retry("session_summary", text, |summary: String| {
        let record = SessionSummary {
            session_id: session_id.to_string(),
            summary,
            topics: topics.clone(),
            turns,
            recorded_at,
        };
        async move { profiles.append_session_summary(visitor, record).await }
    })
    .await;

    let summary = outcome.stored()?.to_string();
    for topic in &topics {
        if let Err(e) = profiles.add_topic(visitor, topic).await {
            warn!(visitor, topic = %topic, error = %e, "Failed to record topic");
        }
    }
    info!(visitor, session_id, turns, topics = topics.len(), "Session summary recorded");

    Some(SessionSummary {
        session_id: session_id.to_string(),
        summary,
        topics,
        turns,
        recorded_at,
    })
}
