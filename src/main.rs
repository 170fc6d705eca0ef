//! WuffChat - terminal client for the WuffChat conversation backend
//!
//! Reads lines from stdin, submits them to the conversation runtime and
//! prints transcript updates as they arrive.

mod clock;
mod config;
mod message;
mod runtime;
mod sequencer;
mod session;
mod state_machine;
mod transport;

use clock::SystemClock;
use config::ClientConfig;
use message::{Message, Sender};
use runtime::{ChatHandle, ChatUpdate};
use sequencer::Pacing;
use session::{MemoryStore, SessionStore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{HttpApi, TransportClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they never interleave with the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wuffchat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    let api = HttpApi::new(&config)?;

    let clock = Arc::new(SystemClock);
    let sessions = Arc::new(SessionStore::new(Arc::new(MemoryStore::new()), clock.clone()));
    let transport = Arc::new(TransportClient::new(api, sessions));

    match transport.check_health().await {
        Ok(status) if status.healthy => tracing::info!("Backend healthy"),
        Ok(status) => tracing::warn!(body = %status.data, "Backend reports unhealthy"),
        Err(e) => tracing::warn!(error = %e, "Backend health check failed"),
    }
    if !transport.is_current_protocol_available().await {
        tracing::info!("Backend does not serve the current protocol");
    }

    let handle = runtime::spawn(transport, clock, Pacing::default());
    let (reload_tx, mut reload_rx) = mpsc::channel(1);
    tokio::spawn(print_updates(handle.subscribe(), reload_tx));
    handle.initialize().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&handle, &line).await {
                    break;
                }
            }
            Some(()) = reload_rx.recv() => handle.reset().await,
        }
    }

    // Last handle gone: the runtime stops and the printer sees the stream close
    drop(handle);
    Ok(())
}

/// Act on one line of input. Returns `false` on `/quit`.
async fn handle_line(handle: &ChatHandle, line: &str) -> bool {
    match line.trim() {
        "/quit" => return false,
        "/reset" => handle.reset().await,
        "/info" => {
            let view = handle.view();
            if let Some(phase) = &view.phase {
                println!("Phase: {phase}");
            }
            if let Some(metadata) = &view.metadata {
                println!("Metadaten: {metadata}");
            }
            match handle.session_info().await {
                Some(info) => println!("{info:#}"),
                None => println!("(keine Sitzung)"),
            }
        }
        _ => {
            if !handle.send_message(line).await {
                let view = handle.view();
                if view.is_loading() {
                    println!("(Wuff denkt noch nach...)");
                } else if !view.is_ready() && !view.has_error() {
                    println!("(/reset startet eine neue Unterhaltung)");
                }
                tracing::debug!(
                    state = view.state.name(),
                    error = ?view.error(),
                    "Message not delivered"
                );
            }
        }
    }
    true
}

/// Print transcript updates; a requested reload is handed back to the input loop
async fn print_updates(mut updates: broadcast::Receiver<ChatUpdate>, reload: mpsc::Sender<()>) {
    loop {
        match updates.recv().await {
            Ok(ChatUpdate::MessageAppended(message)) => print_message(&message),
            Ok(ChatUpdate::TranscriptCleared) => println!("--- neue Unterhaltung ---"),
            Ok(ChatUpdate::Typing(true)) => println!("..."),
            Ok(ChatUpdate::ReloadRequested) => {
                let _ = reload.try_send(());
            }
            Ok(ChatUpdate::StateChanged(state)) => {
                tracing::debug!(state = state.name(), "Chat state changed");
            }
            Ok(ChatUpdate::Typing(false)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Update stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_message(message: &Message) {
    match &message.sender {
        // Own input is already on screen
        Sender::User => {}
        Sender::Agent => println!("Wuff: {}", message.text),
        Sender::System => println!("[{}]", message.text),
        Sender::Error => println!("! {}", message.text),
        other => println!("{other}: {}", message.text),
    }
}
