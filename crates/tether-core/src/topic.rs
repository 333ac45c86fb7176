//! Topics: subscription keys with an attached handler.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Error returned by a topic handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscription key with an asynchronous handler.
///
/// Topics are identified by their `Display` form: two topics with the same
/// string are the same subscription as far as the pool is concerned.
#[async_trait]
pub trait Topic: fmt::Display + Send + Sync {
    /// Handle one decoded event payload.
    ///
    /// Errors are logged by the connection and never interrupt delivery.
    async fn handle(&self, payload: serde_json::Value) -> Result<(), HandlerError>;

    /// The key this topic is subscribed under.
    fn key(&self) -> String {
        self.to_string()
    }
}

/// A topic backed by a closure.
pub struct FnTopic<F> {
    key: String,
    handler: F,
}

impl<F> fmt::Display for FnTopic<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[async_trait]
impl<F, Fut> Topic for FnTopic<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, payload: serde_json::Value) -> Result<(), HandlerError> {
        (self.handler)(payload).await
    }
}

/// Create a topic from a key and an async closure.
///
/// ```rust
/// use tether_core::{topic_fn, Topic};
///
/// let topic = topic_fn("user-drop-events.42", |payload| async move {
///     println!("{payload}");
///     Ok(())
/// });
/// assert_eq!(topic.key(), "user-drop-events.42");
/// ```
pub fn topic_fn<F, Fut>(key: impl Into<String>, handler: F) -> Arc<dyn Topic>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnTopic {
        key: key.into(),
        handler,
    })
}
