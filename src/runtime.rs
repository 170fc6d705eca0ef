//! Runtime for a single chat conversation
//!
//! One actor task owns the transcript and the state machine. The UI talks to
//! it through a [`ChatHandle`]: commands go in over a channel, a snapshot of
//! the conversation comes back through a `watch` channel and incremental
//! updates through a `broadcast` channel.

mod executor;


use executor::ChatRuntime;

use crate::clock::Clock;
use crate::message::Message;
use crate::sequencer::Pacing;
use crate::state_machine::ChatState;
use crate::transport::{ConversationApi, TransportClient};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Read-only snapshot of a conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    pub state: ChatState,
    pub messages: Vec<Message>,
    pub session_id: Option<String>,
    /// Bot is "typing": a request is in flight or the next fragment is due
    pub typing: bool,
    /// Metadata of the latest reply
    pub metadata: Option<Value>,
    /// Conversation phase reported by the backend, if any
    pub phase: Option<String>,
}

impl ChatView {
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    pub fn has_error(&self) -> bool {
        self.state.has_error()
    }

    /// Failure code of the last request, while in the error state
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ChatState::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// Incremental changes pushed to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    StateChanged(ChatState),
    MessageAppended(Message),
    TranscriptCleared,
    Typing(bool),
    /// The session is gone; the front-end should start over
    ReloadRequested,
}

/// Requests from the UI to the runtime
#[derive(Debug)]
pub(crate) enum Command {
    Initialize,
    SendMessage {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Reset {
        done: oneshot::Sender<()>,
    },
    SessionInfo {
        reply: oneshot::Sender<Option<Value>>,
    },
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ChatHandle {
    command_tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<ChatView>,
    broadcast_tx: broadcast::Sender<ChatUpdate>,
}

impl ChatHandle {
    /// Open the conversation. Only the first call has an effect.
    pub async fn initialize(&self) {
        if self.command_tx.send(Command::Initialize).await.is_err() {
            tracing::warn!("Chat runtime is gone, initialize dropped");
        }
    }

    /// Submit a user message.
    ///
    /// Resolves to `true` once the backend accepted the message and replied,
    /// `false` if it was rejected locally or the request failed.
    pub async fn send_message(&self, text: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::SendMessage {
            text: text.into(),
            reply,
        };
        if self.command_tx.send(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Drop the transcript and session and start a new conversation
    pub async fn reset(&self) {
        let (done, rx) = oneshot::channel();
        if self.command_tx.send(Command::Reset { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Backend's view of the active session, `None` without one or on failure
    pub async fn session_info(&self) -> Option<Value> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::SessionInfo { reply })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Current snapshot
    pub fn view(&self) -> ChatView {
        self.view_rx.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    #[cfg(test)]
    pub fn watch(&self) -> watch::Receiver<ChatView> {
        self.view_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.broadcast_tx.subscribe()
    }
}

/// Start a conversation runtime in the background.
///
/// The runtime stops once every handle has been dropped; update subscribers
/// then see the stream close.
pub fn spawn<A>(
    transport: Arc<TransportClient<A>>,
    clock: Arc<dyn Clock>,
    pacing: Pacing,
) -> ChatHandle
where
    A: ConversationApi + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    let (broadcast_tx, _) = broadcast::channel(128);
    let (view_tx, view_rx) = watch::channel(ChatView::default());

    let runtime = ChatRuntime::new(
        transport,
        clock,
        pacing,
        command_rx,
        view_tx,
        broadcast_tx.clone(),
    );

    tokio::spawn(async move {
        runtime.run().await;
        tracing::info!("Chat runtime finished");
    });

    ChatHandle {
        command_tx,
        view_rx,
        broadcast_tx,
    }
}
