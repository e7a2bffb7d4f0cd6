//! Cross-process pub/sub interface.
//!
//! Multi-instance deployments fan deltas out through an external broker
//! consumed via [`PubSub`]; single-instance deployments run with
//! [`NoopPubSub`] and skip the hop entirely.

use crate::error::EngineResult;
use crate::protocol::Message;
use async_trait::async_trait;
use docsync_types::DocumentId;
use tokio::sync::mpsc;

/// Narrow broker interface for multi-instance fan-out.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publishes a delta fan-out message for one document.
    async fn publish_delta(&self, document_id: &DocumentId, message: &Message)
        -> EngineResult<()>;

    /// Subscribes to deltas published for one document by other instances.
    async fn subscribe_to_document(
        &self,
        document_id: &DocumentId,
    ) -> EngineResult<mpsc::UnboundedReceiver<Message>>;

    /// Publishes a message to every instance.
    async fn publish_broadcast(&self, message: &Message) -> EngineResult<()>;

    /// Subscribes to instance-wide broadcasts.
    async fn subscribe_to_broadcast(&self) -> EngineResult<mpsc::UnboundedReceiver<Message>>;

    /// Announces this instance to the broker.
    async fn announce_presence(&self) -> EngineResult<()>;

    /// Announces shutdown so peers stop routing to this instance.
    async fn announce_shutdown(&self) -> EngineResult<()>;
}

/// A [`PubSub`] that drops everything. Single-instance default.
#[derive(Debug, Default)]
pub struct NoopPubSub;

#[async_trait]
impl PubSub for NoopPubSub {
    async fn publish_delta(
        &self,
        _document_id: &DocumentId,
        _message: &Message,
    ) -> EngineResult<()> {
        Ok(())
    }

    async fn subscribe_to_document(
        &self,
        _document_id: &DocumentId,
    ) -> EngineResult<mpsc::UnboundedReceiver<Message>> {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }

    async fn publish_broadcast(&self, _message: &Message) -> EngineResult<()> {
        Ok(())
    }

    async fn subscribe_to_broadcast(&self) -> EngineResult<mpsc::UnboundedReceiver<Message>> {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }

    async fn announce_presence(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn announce_shutdown(&self) -> EngineResult<()> {
        Ok(())
    }
}
