use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ReasoningFunction, ReasoningKind, ReasoningRequest};
use crate::error::ReasoningError;

/// A conversation with the reasoning backend, owned by one processor.
///
/// The session id returned by the backend is carried into the next call so
/// context can be reused across items. [`reset`](Self::reset) starts over.
pub struct ReasoningSession {
    reasoner: Arc<dyn ReasoningFunction>,
    session_id: Option<String>,
    resets: u32,
}

impl ReasoningSession {
    pub fn new(reasoner: Arc<dyn ReasoningFunction>) -> Self {
        Self {
            reasoner,
            session_id: None,
            resets: 0,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn reset(&mut self) {
        if self.session_id.take().is_some() {
            debug!(target: "tome::reasoning", "session reset");
        }
        self.resets += 1;
    }

    async fn attempt<T: DeserializeOwned>(
        &mut self,
        kind: ReasoningKind,
        context: &Value,
    ) -> Result<T, ReasoningError> {
        let mut request = ReasoningRequest::new(kind, context.clone());
        request.session_id = self.session_id.clone();
        let response = self.reasoner.call(request).await?;
        if let Some(id) = response.session_id {
            self.session_id = Some(id);
        }
        serde_json::from_value(response.output)
            .map_err(|e| ReasoningError::Malformed(format!("{} result: {e}", kind.as_str())))
    }

    /// Ask for a typed result. A failure resets the session and retries once.
    pub async fn ask<T: DeserializeOwned>(
        &mut self,
        kind: ReasoningKind,
        context: &Value,
    ) -> Result<T, ReasoningError> {
        match self.attempt(kind, context).await {
            Ok(v) => Ok(v),
            Err(first) => {
                warn!(
                    target: "tome::reasoning",
                    kind = kind.as_str(),
                    error = %first,
                    "reasoning call failed; resetting session and retrying once"
                );
                self.reset();
                self.attempt(kind, context).await
            }
        }
    }
}
