//! The transport interface consumed by the router.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// DM vs. group, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Dm,
    Group,
}

/// One inbound message, as reported by a transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub chat_id: String,
    pub chat_kind: ChatKind,
    pub thread_id: Option<String>,
    pub text: String,
    pub attachments: Vec<String>,
    pub received_at: DateTime<Utc>,
}

/// Consumed: a chat transport (Telegram, Slack, Discord, ...). Concrete wire
/// protocols are out of scope; the router only calls through this
/// interface.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Registers the callback the transport invokes for every received
    /// message.
    fn set_inbox(&self, submit: Box<dyn Fn(InboundMessage) + Send + Sync>);

    async fn send(&self, chat_id: &str, reply: &str) -> Result<(), String>;

    async fn start(&self) -> Result<(), String>;
    async fn stop(&self) -> Result<(), String>;
}
