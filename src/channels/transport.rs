//! Transport seam between the batch sender and the provider.

use async_trait::async_trait;
use serde::Serialize;

use crate::channels::Channel;
use crate::error::SendError;

/// A fully rendered message ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    /// Provider address (`whatsapp:+...` or `+...`).
    pub to: String,
    /// Sender address configured for the channel.
    pub from: String,
    pub channel: Channel,
    pub template_id: String,
    pub body: String,
}

/// What the transport reports back for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Provider-side message id, when the transport returns one.
    pub message_id: Option<String>,
}

/// Something that can hand a message to the external channel.
///
/// One `send` call delivers to one recipient. Pacing between recipients
/// belongs to the caller.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, SendError>;
}
