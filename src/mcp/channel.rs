//! Duplex message channel between a transport and the dispatcher
//!
//! Every transport adapter implements [`MessageChannel`] natively: buffered
//! HTTP responses collect frames in memory, SSE streams push them onto the
//! open event stream. [`McpConnection`] binds one channel to one dispatcher
//! for the lifetime of a logical connection.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::mcp::server::Dispatcher;

/// One unit written to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON-RPC response, batch or notification.
    Message(Value),
    /// A named event carrying raw text, e.g. the SSE `endpoint` event.
    Event { event: String, data: String },
    /// Keep-alive text without protocol meaning.
    Comment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
}

#[async_trait]
pub trait MessageChannel: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), ChannelError>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Collects frames for transports that answer with a single HTTP body.
#[derive(Debug, Default)]
pub struct BufferedChannel {
    frames: Vec<Frame>,
    closed: bool,
}

impl BufferedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }
}

#[async_trait]
impl MessageChannel for BufferedChannel {
    async fn send(&mut self, frame: Frame) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.frames.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

pub struct McpConnection<C: MessageChannel> {
    dispatcher: Dispatcher,
    channel: C,
}

impl<C: MessageChannel> McpConnection<C> {
    pub fn new(dispatcher: Dispatcher, channel: C) -> Self {
        Self {
            dispatcher,
            channel,
        }
    }

    /// Dispatches one inbound payload (single message or batch) and writes
    /// the response, if any, to the channel. Returns whether a response was
    /// written.
    pub async fn on_message(&mut self, payload: Value) -> Result<bool, ChannelError> {
        if self.channel.is_closed() {
            return Err(ChannelError::Closed);
        }

        match self.dispatcher.handle_payload(payload).await {
            Some(response) => {
                self.channel.send(Frame::Message(response)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn close(&mut self) {
        self.dispatcher.close();
        self.channel.close();
    }
}

impl<C: MessageChannel> Drop for McpConnection<C> {
    fn drop(&mut self) {
        self.close();
    }
}
