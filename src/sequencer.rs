//! Reply sequencer
//!
//! Plays multi-fragment replies back one at a time with a simulated reading
//! delay, so a burst of bot output looks like someone typing it.

use crate::transport::ReplyFragment;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Pacing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Simulated reading speed
    pub chars_per_second: u32,
    /// Lower bound for any fragment's delay
    pub min_delay: Duration,
    /// Extra pause before every fragment after the first
    pub pause: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            chars_per_second: 100,
            min_delay: Duration::from_secs(1),
            pause: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// Time a fragment of `text` occupies before the next one may start
    pub fn reading_delay(&self, text: &str) -> Duration {
        let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
        let cps = u64::from(self.chars_per_second.max(1));
        let reading = Duration::from_millis(chars.saturating_mul(1000) / cps);
        reading.max(self.min_delay)
    }
}

/// When one fragment shows up, relative to playback start
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStep {
    /// Typing indicator comes back on (every fragment but the first)
    pub typing_at: Option<Duration>,
    pub append_at: Duration,
    pub fragment: ReplyFragment,
}

/// What playback reports as it goes
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Typing,
    Fragment(ReplyFragment),
    Finished,
}

/// Lay fragments out on a timeline.
///
/// Fragment `n` starts at the sum of the delays and pauses of all fragments
/// before it; the first one is shown at once.
pub fn plan(fragments: &[ReplyFragment], pacing: &Pacing) -> Vec<PlaybackStep> {
    let mut offset = Duration::ZERO;
    fragments
        .iter()
        .enumerate()
        .map(|(index, fragment)| {
            let (typing_at, append_at) = if index == 0 {
                (None, offset)
            } else {
                (Some(offset), offset + pacing.pause)
            };
            offset = append_at + pacing.reading_delay(&fragment.text);
            PlaybackStep {
                typing_at,
                append_at,
                fragment: fragment.clone(),
            }
        })
        .collect()
}

/// Play `steps` in order, reporting through `tx`.
///
/// Returns `false` if `cancel` fired first; nothing is sent after that.
pub async fn play<E>(
    steps: Vec<PlaybackStep>,
    cancel: CancellationToken,
    tx: mpsc::Sender<E>,
    wrap: impl Fn(PlaybackEvent) -> E,
) -> bool {
    let start = Instant::now();

    for step in steps {
        if let Some(typing_at) = step.typing_at {
            if !wait_until(start + typing_at, &cancel).await {
                return false;
            }
            if tx.send(wrap(PlaybackEvent::Typing)).await.is_err() {
                return false;
            }
        }
        if !wait_until(start + step.append_at, &cancel).await {
            return false;
        }
        if tx.send(wrap(PlaybackEvent::Fragment(step.fragment))).await.is_err() {
            return false;
        }
    }

    if cancel.is_cancelled() {
        return false;
    }
    tx.send(wrap(PlaybackEvent::Finished)).await.is_ok()
}

async fn wait_until(deadline: Instant, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep_until(deadline) => true,
    }
}
