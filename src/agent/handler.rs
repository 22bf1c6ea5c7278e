//! Message and request handlers registered on an agent.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::envelope::{Envelope, Payload};
use crate::protocol::ids::MessagePattern;

/// Handles events (and requests) whose type matches the registered pattern.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()>;
}

/// Answers requests. The returned payload is routed back to the requester.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &Envelope) -> anyhow::Result<Payload>;
}

/// Closure adapter for [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
        (self.0)(envelope.clone()).await
    }
}

/// Closure adapter for [`RequestHandler`].
pub struct FnRequestHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnRequestHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Payload>> + Send,
{
    async fn handle(&self, request: &Envelope) -> anyhow::Result<Payload> {
        (self.0)(request.clone()).await
    }
}

/// Wrap an async closure as a message handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap an async closure as a request handler.
pub fn request_handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
{
    Arc::new(FnRequestHandler(f))
}

/// Handlers registered on one agent, in registration order.
#[derive(Default)]
pub(crate) struct Handlers {
    pub(crate) messages: Vec<(MessagePattern, Arc<dyn MessageHandler>)>,
    pub(crate) requests: Vec<(MessagePattern, Arc<dyn RequestHandler>)>,
}

impl Handlers {
    pub(crate) fn clear(&mut self) {
        self.messages.clear();
        self.requests.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len() + self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ids::{create_message_type, AgentId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope() -> Envelope {
        Envelope::event(
            AgentId::new(),
            AgentId::new(),
            create_message_type("ping").unwrap(),
            Payload::new(),
        )
    }

    #[tokio::test]
    async fn test_closure_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = handler_fn(move |_envelope| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        handler.handle(&envelope()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let responder = request_handler_fn(|request: Envelope| async move {
            let mut payload = Payload::new();
            payload.insert("type".to_string(), request.message_type().as_str().into());
            Ok(payload)
        });
        let payload = responder.handle(&envelope()).await.unwrap();
        assert_eq!(payload["type"], "ping");
    }
}
