//! Chat runtime executor

use super::{ChatUpdate, ChatView, Command};
use crate::clock::Clock;
use crate::message::{Message, MessageDraft, MessageIdGen, Sender};
use crate::sequencer::{self, Pacing, PlaybackEvent};
use crate::state_machine::{transition, ChatContext, ChatState, Effect, Event, TransitionError};
use crate::transport::{BotReply, ConversationApi, StartReply, TransportClient, TransportFailure};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Results reported back by background tasks.
///
/// Everything except a start result carries the epoch it was issued in;
/// anything from an older epoch belongs to a conversation that was reset.
#[derive(Debug)]
enum Internal {
    Started(Result<StartReply, TransportFailure>),
    Sent {
        epoch: u64,
        result: Result<BotReply, TransportFailure>,
    },
    Playback {
        epoch: u64,
        event: PlaybackEvent,
        conversation_done: bool,
    },
    ReloadDue {
        epoch: u64,
    },
}

impl Internal {
    fn epoch(&self) -> Option<u64> {
        match self {
            Internal::Started(_) => None,
            Internal::Sent { epoch, .. }
            | Internal::Playback { epoch, .. }
            | Internal::ReloadDue { epoch } => Some(*epoch),
        }
    }
}

/// Initialisation runs at most once until the next reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitLatch {
    Idle,
    Starting,
    Initialized,
}

pub struct ChatRuntime<A: ConversationApi + 'static> {
    transport: Arc<TransportClient<A>>,
    clock: Arc<dyn Clock>,
    pacing: Pacing,
    state: ChatState,
    context: ChatContext,
    messages: Vec<Message>,
    ids: MessageIdGen,
    typing: bool,
    metadata: Option<Value>,
    phase: Option<String>,
    epoch: u64,
    latch: InitLatch,
    start_in_flight: bool,
    /// Caller waiting for the outcome of the in-flight send
    pending_send: Option<oneshot::Sender<bool>>,
    /// Parent of playback and reload timers; replaced when they are cancelled
    scheduled: CancellationToken,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::Receiver<Internal>,
    event_tx: mpsc::Sender<Internal>,
    view_tx: watch::Sender<ChatView>,
    broadcast_tx: broadcast::Sender<ChatUpdate>,
}

impl<A: ConversationApi + 'static> ChatRuntime<A> {
    pub(crate) fn new(
        transport: Arc<TransportClient<A>>,
        clock: Arc<dyn Clock>,
        pacing: Pacing,
        command_rx: mpsc::Receiver<Command>,
        view_tx: watch::Sender<ChatView>,
        broadcast_tx: broadcast::Sender<ChatUpdate>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(32);
        Self {
            transport,
            clock,
            pacing,
            state: ChatState::Initializing,
            context: ChatContext::default(),
            messages: Vec::new(),
            ids: MessageIdGen::new(),
            typing: false,
            metadata: None,
            phase: None,
            epoch: 0,
            latch: InitLatch::Idle,
            start_in_flight: false,
            pending_send: None,
            scheduled: CancellationToken::new(),
            command_rx,
            event_rx,
            event_tx,
            view_tx,
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Starting chat runtime");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(internal) = self.event_rx.recv() => self.handle_internal(internal),
            }
            self.publish_view();
        }

        self.scheduled.cancel();
        tracing::info!("Chat runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize => {
                if self.latch == InitLatch::Idle {
                    self.execute_effect(Effect::StartConversation);
                } else {
                    tracing::debug!(latch = ?self.latch, "Already initialized, ignoring");
                }
            }

            Command::SendMessage { text, reply } => {
                if self.session_lapsed(&text) {
                    tracing::info!("Stored session expired before submit");
                    self.process_internal_event(Event::SessionLost);
                    self.publish_view();
                    let _ = reply.send(false);
                    return;
                }
                match self.process_event(Event::UserMessage { text }) {
                    Ok(()) => {
                        if let Some(previous) = self.pending_send.replace(reply) {
                            let _ = previous.send(false);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Message rejected");
                        let _ = reply.send(false);
                    }
                }
            }

            Command::Reset { done } => {
                tracing::info!(epoch = self.epoch, "Resetting conversation");
                if let Err(e) = self.process_event(Event::Reset) {
                    tracing::error!(error = %e, "Reset failed");
                }
                self.publish_view();
                let _ = done.send(());
            }

            Command::SessionInfo { reply } => {
                let Some(session_id) = self.context.session_id.clone() else {
                    let _ = reply.send(None);
                    return;
                };
                let transport = self.transport.clone();
                tokio::spawn(async move {
                    let info = transport.get_session_info(&session_id).await.ok();
                    let _ = reply.send(info);
                });
            }
        }
    }

    /// A submit that would be accepted, but the store says the session aged out
    fn session_lapsed(&self, text: &str) -> bool {
        !text.trim().is_empty()
            && self.state.accepts_input()
            && self.context.session_id.is_some()
            && !self.transport.sessions().has_valid()
    }

    fn handle_internal(&mut self, internal: Internal) {
        if let Some(epoch) = internal.epoch() {
            if epoch != self.epoch {
                tracing::debug!(epoch, current = self.epoch, "Dropping stale result");
                return;
            }
        }

        match internal {
            Internal::Started(result) => {
                self.start_in_flight = false;
                self.latch = InitLatch::Initialized;
                let event = match result {
                    Ok(StartReply { session_id, reply }) => {
                        Event::StartSucceeded { session_id, reply }
                    }
                    Err(failure) => Event::StartFailed { failure },
                };
                self.process_internal_event(event);
            }

            Internal::Sent { result, .. } => {
                self.set_typing(false);
                let (succeeded, event) = match result {
                    Ok(reply) => (true, Event::SendSucceeded { reply }),
                    Err(failure) => (false, Event::SendFailed { failure }),
                };
                let pending = self.pending_send.take();
                self.process_internal_event(event);
                // Callers see the reply in the view once they hear back
                self.publish_view();
                if let Some(reply) = pending {
                    let _ = reply.send(succeeded);
                }
            }

            Internal::Playback {
                event,
                conversation_done,
                ..
            } => match event {
                PlaybackEvent::Typing => self.set_typing(true),
                PlaybackEvent::Fragment(fragment) => {
                    self.set_typing(false);
                    self.append(fragment.to_draft());
                }
                PlaybackEvent::Finished => {
                    self.process_internal_event(Event::PlaybackFinished { conversation_done });
                }
            },

            Internal::ReloadDue { .. } => {
                tracing::info!("Requesting reload after session expiry");
                let _ = self.broadcast_tx.send(ChatUpdate::ReloadRequested);
            }
        }
    }

    fn process_internal_event(&mut self, event: Event) {
        if let Err(e) = self.process_event(event) {
            tracing::debug!(error = %e, state = self.state.name(), "Ignoring event");
        }
    }

    fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let event_name = event.name();
        let result = transition(&self.state, &self.context, event)?;

        tracing::debug!(
            event = event_name,
            from = self.state.name(),
            to = result.new_state.name(),
            effects = result.effects.len(),
            "State transition"
        );

        if result.new_state != self.state {
            self.state = result.new_state;
            let _ = self
                .broadcast_tx
                .send(ChatUpdate::StateChanged(self.state.clone()));
        }

        for effect in result.effects {
            self.execute_effect(effect);
        }
        Ok(())
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::StartConversation => {
                self.latch = InitLatch::Starting;
                if self.start_in_flight {
                    tracing::debug!("Start already in flight, adopting it");
                    return;
                }
                self.start_in_flight = true;

                let transport = self.transport.clone();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = transport.start_conversation(None).await;
                    let _ = event_tx.send(Internal::Started(result)).await;
                });
            }

            Effect::SendMessage { session_id, text } => {
                self.set_typing(true);

                let transport = self.transport.clone();
                let event_tx = self.event_tx.clone();
                let epoch = self.epoch;
                tokio::spawn(async move {
                    tracing::info!(session_id = %session_id, "Sending message (background)");
                    let result = transport.send_message(&session_id, &text).await;
                    let _ = event_tx.send(Internal::Sent { epoch, result }).await;
                });
            }

            Effect::AppendMessage(draft) => self.append(draft),

            Effect::PlayReply {
                fragments,
                conversation_done,
            } => {
                let steps = sequencer::plan(&fragments, &self.pacing);
                let cancel = self.scheduled.child_token();
                let event_tx = self.event_tx.clone();
                let epoch = self.epoch;
                tokio::spawn(sequencer::play(steps, cancel, event_tx, move |event| {
                    Internal::Playback {
                        epoch,
                        event,
                        conversation_done,
                    }
                }));
            }

            Effect::RecordReplyMeta { metadata, phase } => {
                self.metadata = metadata;
                self.phase = phase;
            }

            Effect::SetSession {
                session_id,
                session_token,
            } => {
                // A reset may have wiped the store while this start was in flight
                if let Err(e) = self
                    .transport
                    .sessions()
                    .set(&session_id, session_token.as_deref())
                {
                    tracing::warn!(error = %e, "Could not persist session");
                }
                self.context.session_id = Some(session_id);
            }

            Effect::ClearSession => {
                self.context.session_id = None;
                self.transport.sessions().clear();
            }

            Effect::ClearTranscript => {
                self.messages.clear();
                self.metadata = None;
                self.phase = None;
                let _ = self.broadcast_tx.send(ChatUpdate::TranscriptCleared);
            }

            Effect::CancelScheduled => {
                self.scheduled.cancel();
                self.scheduled = CancellationToken::new();
                self.epoch += 1;
                self.set_typing(false);
                if let Some(reply) = self.pending_send.take() {
                    let _ = reply.send(false);
                }
            }

            Effect::ScheduleReload { delay } => self.schedule_reload(delay),
        }
    }

    fn schedule_reload(&self, delay: Duration) {
        let cancel = self.scheduled.child_token();
        let event_tx = self.event_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = event_tx.send(Internal::ReloadDue { epoch }).await;
                }
            }
        });
    }

    fn append(&mut self, draft: MessageDraft) {
        if draft.sender == Sender::Typing {
            return;
        }
        let message = self.ids.stamp(self.clock.as_ref(), draft);
        self.messages.push(message.clone());
        let _ = self.broadcast_tx.send(ChatUpdate::MessageAppended(message));
    }

    fn set_typing(&mut self, typing: bool) {
        if self.typing != typing {
            self.typing = typing;
            let _ = self.broadcast_tx.send(ChatUpdate::Typing(typing));
        }
    }

    fn publish_view(&self) {
        let view = ChatView {
            state: self.state.clone(),
            messages: self.messages.clone(),
            session_id: self.context.session_id.clone(),
            typing: self.typing,
            metadata: self.metadata.clone(),
            phase: self.phase.clone(),
        };
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
