//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::transition::*;
use super::*;
use crate::message::{MessageDraft, Sender};
use crate::transport::{BotReply, FailureKind, ReplyFragment, TransportFailure};
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_state() -> impl Strategy<Value = ChatState> {
    prop_oneof![
        Just(ChatState::Initializing),
        Just(ChatState::Ready),
        Just(ChatState::Sending),
        "[A-Z_]{3,16}".prop_map(|error| ChatState::Error { error }),
        Just(ChatState::SessionExpired),
        Just(ChatState::Completed),
    ]
}

fn arb_context() -> impl Strategy<Value = ChatContext> {
    prop_oneof![
        Just(ChatContext::default()),
        "[a-z0-9-]{1,12}".prop_map(ChatContext::with_session),
    ]
}

fn arb_failure_kind() -> impl Strategy<Value = FailureKind> {
    prop_oneof![
        Just(FailureKind::DuplicateRequest),
        Just(FailureKind::NoSession),
        Just(FailureKind::SessionExpired),
        Just(FailureKind::ServerError),
        (400u16..600).prop_map(FailureKind::Api),
        "[a-z ]{0,20}".prop_map(FailureKind::Network),
        "[a-z ]{0,20}".prop_map(FailureKind::Decode),
    ]
}

fn arb_failure() -> impl Strategy<Value = TransportFailure> {
    (arb_failure_kind(), proptest::option::of("[A-Za-zä ]{1,20}"))
        .prop_map(|(kind, fallback)| TransportFailure::new(kind, fallback.as_deref()))
}

fn arb_reply() -> impl Strategy<Value = BotReply> {
    (proptest::collection::vec("[a-zA-Z ]{0,40}", 0..4), any::<bool>()).prop_map(
        |(texts, done)| BotReply {
            fragments: texts
                .into_iter()
                .map(|t| ReplyFragment::new(Sender::Agent, t))
                .collect(),
            done,
            ..BotReply::text("")
        },
    )
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        ("[a-z0-9-]{1,12}", arb_reply())
            .prop_map(|(session_id, reply)| Event::StartSucceeded { session_id, reply }),
        arb_failure().prop_map(|failure| Event::StartFailed { failure }),
        arb_reply().prop_map(|reply| Event::SendSucceeded { reply }),
        arb_failure().prop_map(|failure| Event::SendFailed { failure }),
        "[ a-zA-Z]{0,20}".prop_map(|text| Event::UserMessage { text }),
        Just(Event::Reset),
        Just(Event::SessionLost),
        any::<bool>().prop_map(|conversation_done| Event::PlaybackFinished { conversation_done }),
    ]
}

/// Apply effects that feed back into the context the way the runtime does
fn apply_context(ctx: &mut ChatContext, effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::SetSession { session_id, .. } => ctx.session_id = Some(session_id.clone()),
            Effect::ClearSession => ctx.session_id = None,
            _ => {}
        }
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: A send is only ever issued from Sending, with a session
    #[test]
    fn prop_send_only_when_sending(events in proptest::collection::vec(arb_event(), 0..30)) {
        let mut state = ChatState::Initializing;
        let mut ctx = ChatContext::default();

        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                for effect in &result.effects {
                    if let Effect::SendMessage { session_id, text } = effect {
                        prop_assert_eq!(&result.new_state, &ChatState::Sending);
                        prop_assert_eq!(Some(session_id), ctx.session_id.as_ref());
                        prop_assert!(!text.trim().is_empty());
                    }
                }
                apply_context(&mut ctx, &result.effects);
                state = result.new_state;
            }
        }
    }

    // Invariant 2: Whitespace-only input never changes anything
    #[test]
    fn prop_blank_message_rejected(
        state in arb_state(),
        ctx in arb_context(),
        text in "[ \t\n]{0,10}"
    ) {
        let result = transition(&state, &ctx, Event::UserMessage { text });
        prop_assert!(result.is_err());
    }

    // Invariant 3: Reset always restarts the conversation from scratch
    #[test]
    fn prop_reset_always_reinitializes(state in arb_state(), ctx in arb_context()) {
        let result = transition(&state, &ctx, Event::Reset).unwrap();
        prop_assert_eq!(result.new_state, ChatState::Initializing);
        prop_assert!(result.effects.contains(&Effect::ClearTranscript));
        prop_assert!(result.effects.contains(&Effect::ClearSession));
        prop_assert_eq!(result.effects.last(), Some(&Effect::StartConversation));
    }

    // Invariant 4: A failure that needs a reload always expires the session
    #[test]
    fn prop_expiry_always_wins(state in arb_state(), ctx in arb_context()) {
        let event = Event::SendFailed { failure: TransportFailure::session_expired() };
        let result = transition(&state, &ctx, event).unwrap();
        prop_assert_eq!(result.new_state, ChatState::SessionExpired);
        prop_assert!(result.effects.contains(&Effect::ClearSession));
        let schedules_reload = result.effects.iter().any(|e| matches!(e, Effect::ScheduleReload { .. }));
        prop_assert!(schedules_reload);
    }

    // Invariant 5: Closed conversations only reopen through reset
    #[test]
    fn prop_closed_states_are_sticky(
        closed in prop_oneof![Just(ChatState::SessionExpired), Just(ChatState::Completed)],
        ctx in arb_context(),
        event in arb_event()
    ) {
        let is_reset = matches!(event, Event::Reset);
        if let Ok(result) = transition(&closed, &ctx, event) {
            prop_assert!(
                is_reset || result.new_state == ChatState::SessionExpired,
                "Closed state left without reset: {:?}",
                result.new_state
            );
        }
    }

    // Invariant 6: Every start or send failure short of expiry leaves a visible bubble
    #[test]
    fn prop_failures_are_visible(failure in arb_failure(), starting in any::<bool>()) {
        prop_assume!(!failure.requires_reload());
        let expected = failure
            .fallback_message
            .clone()
            .unwrap_or_else(|| GENERIC_ERROR_TEXT.to_string());

        let (state, event) = if starting {
            (ChatState::Initializing, Event::StartFailed { failure })
        } else {
            (ChatState::Sending, Event::SendFailed { failure })
        };
        let result = transition(&state, &ChatContext::default(), event).unwrap();
        prop_assert!(result.new_state.has_error());
        prop_assert_eq!(result.effects, vec![Effect::append(MessageDraft::error(expected))]);
    }

    // Invariant 7: Replies with several fragments keep the machine busy
    #[test]
    fn prop_playback_holds_busy_state(reply in arb_reply()) {
        let fragments = reply.fragments.len();
        let result = transition(&ChatState::Sending, &ChatContext::with_session("s"), Event::SendSucceeded { reply }).unwrap();
        if fragments > 1 {
            prop_assert_eq!(result.new_state, ChatState::Sending);
        } else {
            prop_assert!(matches!(result.new_state, ChatState::Ready | ChatState::Completed));
        }
    }
}
