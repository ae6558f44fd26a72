//! Deterministic provider driven by a script of canned responses.
//!
//! Used by the test suite and by embedders that need a model stand-in.
//! Responses are served from a FIFO queue first; once the queue is empty
//! an optional responder closure computes replies from the request.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EkoError, Result};
use crate::llm::provider::{LlmProvider, StreamHandler};
use crate::llm::types::{LlmParams, LlmResponse, Message};

type Responder = dyn Fn(&[Message], &LlmParams) -> Result<LlmResponse> + Send + Sync;

/// A request the provider received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub params: LlmParams,
    pub streamed: bool,
}

/// Queue-driven [`LlmProvider`].
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    queue: Arc<Mutex<VecDeque<Result<LlmResponse>>>>,
    responder: Option<Arc<Responder>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    /// An empty script.  Every call fails until responses are queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that answers with `responses` in order.
    pub fn with_responses(responses: impl IntoIterator<Item = LlmResponse>) -> Self {
        let provider = Self::new();
        for r in responses {
            provider.push_response(r);
        }
        provider
    }

    /// Compute replies from the request once the queue is drained.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[Message], &LlmParams) -> Result<LlmResponse> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a successful response.
    pub fn push_response(&self, response: LlmResponse) {
        self.lock_queue().push_back(Ok(response));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: EkoError) {
        self.lock_queue().push_back(Err(error));
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of queued responses not yet served.
    pub fn remaining(&self) -> usize {
        self.lock_queue().len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<LlmResponse>>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn next(&self, messages: &[Message], params: &LlmParams, streamed: bool) -> Result<LlmResponse> {
        {
            let mut requests = match self.requests.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                params: params.clone(),
                streamed,
            });
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self.lock_queue().pop_front();
        match (queued, &self.responder) {
            (Some(result), _) => result,
            (None, Some(responder)) => responder(messages, params),
            (None, None) => Err(EkoError::Internal("scripted provider has no response left".into())),
        }
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("remaining", &self.remaining())
            .field("has_responder", &self.responder.is_some())
            .finish()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_text(
        &self,
        messages: &[Message],
        params: &LlmParams,
    ) -> Result<LlmResponse> {
        self.next(messages, params, false).await
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        params: &LlmParams,
        handler: &mut (dyn StreamHandler + Send),
    ) -> Result<LlmResponse> {
        match self.next(messages, params, true).await {
            Ok(response) => {
                handler.on_start();
                if let Some(text) = &response.text_content {
                    handler.on_content(text);
                }
                for call in &response.tool_calls {
                    handler.on_tool_use(call);
                }
                handler.on_complete(&response);
                Ok(response)
            }
            Err(e) => {
                handler.on_error(&e);
                Err(e)
            }
        }
    }
}
