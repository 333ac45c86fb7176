//! Topic handlers for the watcher.

use std::sync::Arc;
use tether_core::{topic_fn, Topic};
use tracing::info;

/// A topic whose handler logs every payload it receives.
pub fn log_topic(key: &str) -> Arc<dyn Topic> {
    let name = key.to_string();
    topic_fn(key, move |payload| {
        let name = name.clone();
        async move {
            info!(topic = %name, payload = %payload, "Message");
            Ok(())
        }
    })
}

/// Build one logging topic per key, skipping blank and duplicate keys.
pub fn log_topics(keys: &[String]) -> Vec<Arc<dyn Topic>> {
    let mut seen = std::collections::HashSet::new();
    keys.iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty() && seen.insert(key.to_string()))
        .map(log_topic)
        .collect()
}
