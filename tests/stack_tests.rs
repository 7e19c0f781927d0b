//! Shadow-stack reconciliation against well-ordered and quirky event
//! streams.

mod common;

use common::{engine_with_actions, ev, fixture, RecordingUi};
use script_debugger::{
    DebugOpcode, DebuggerEngine, EngineOptions, RecursionLimits, UserAction,
};

#[test]
fn depth_tracks_open_frames() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let state = fx.state_frame(1, fx.pawn_obj, false);
    let tick = fx.function_frame(2, fx.pawn_obj, fx.tick, vec![]);

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterFrame, 5));
    assert_eq!(engine.depth(), 1);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));
    assert_eq!(engine.depth(), 2);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::Statement, 13));
    assert_eq!(engine.depth(), 2, "progress events keep the depth");

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::LeaveFrame, 14));
    assert_eq!(engine.depth(), 1);

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::LeaveFrame, 6));
    assert_eq!(engine.depth(), 0);
}

#[test]
fn progress_updates_top_frame_history() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 10));
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::Statement, 11));
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::Conditional, 12));

    let top = engine.call_stack().top().expect("frame on stack");
    assert_eq!(top.line(), 12);
    assert_eq!(top.history().count(), 3);
}

#[test]
fn out_of_order_state_leave_is_replayed_after_unwind() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let state = fx.state_frame(1, fx.pawn_obj, false);
    let tick = fx.function_frame(2, fx.pawn_obj, fx.tick, vec![]);

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterFrame, 5));
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));

    // The state transition wants its state frame gone while the function
    // is still on top: deferred, not applied.
    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::LeaveFrame, 6));
    assert_eq!(engine.depth(), 2, "mismatched leave must be deferred");
    assert_eq!(engine.call_stack().queued_len(), 1);

    // Unwinding the function triggers the replay; the final stack matches
    // the logical order (function leave, then state leave).
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::LeaveFrame, 13));
    assert_eq!(engine.depth(), 0);
    assert_eq!(engine.call_stack().queued_len(), 0);
}

#[test]
fn deferred_leave_with_latent_action_is_dropped() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let state = fx.state_frame(1, fx.pawn_obj, true);
    let tick = fx.function_frame(2, fx.pawn_obj, fx.tick, vec![]);

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterFrame, 5));
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));
    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::LeaveFrame, 6));

    // A latent action will consume the state frame instead; nothing is
    // queued and the event is swallowed.
    assert_eq!(engine.depth(), 2);
    assert_eq!(engine.call_stack().queued_len(), 0);
}

#[test]
fn queued_leaves_for_gone_frames_are_discarded() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let state = fx.state_frame(1, fx.pawn_obj, false);
    let other_state = fx.state_frame(3, fx.other_obj, false);
    let tick = fx.function_frame(2, fx.pawn_obj, fx.tick, vec![]);

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterFrame, 5));
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));

    // Deferred leave targets a state frame that never made it onto the
    // shadow stack.
    engine.on_debug_event(&fx.vm, &ev(other_state, fx.other_obj, DebugOpcode::LeaveFrame, 7));
    assert_eq!(engine.call_stack().queued_len(), 1);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::LeaveFrame, 13));
    // Head does not match the surviving state frame: still queued.
    assert_eq!(engine.depth(), 1);
    assert_eq!(engine.call_stack().queued_len(), 1);

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::LeaveFrame, 6));
    // Stack emptied: the stale queued leave is dropped as a no-op.
    assert_eq!(engine.depth(), 0);
    assert_eq!(engine.call_stack().queued_len(), 0);
}

#[test]
fn deferred_state_enter_replays_once_function_unwinds() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    let new_state = fx.state_frame(2, fx.pawn_obj, false);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));

    // Returning to state scope while the function frame is still open:
    // the enter waits in the queue.
    engine.on_debug_event(&fx.vm, &ev(new_state, fx.pawn_obj, DebugOpcode::EnterState, 30));
    assert_eq!(engine.depth(), 1);
    assert_eq!(engine.call_stack().queued_len(), 1);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::LeaveFrame, 13));
    assert_eq!(engine.depth(), 1, "queued state enter must replay");
    let top = engine.call_stack().top().unwrap();
    assert_eq!(top.handle, new_state);
    assert_eq!(engine.call_stack().queued_len(), 0);
}

#[test]
fn latent_call_unwinds_the_state_frame() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let state = fx.state_frame(1, fx.pawn_obj, false);
    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterFrame, 5));
    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::LeaveLatentCall, 8));
    assert_eq!(engine.depth(), 0, "latent call removes the state frame");

    // The latent function returned: state code resumes with a fresh frame.
    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterLatentResume, 9));
    assert_eq!(engine.depth(), 1);
}

#[test]
fn label_with_empty_stack_behaves_as_enter() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let state = fx.state_frame(1, fx.pawn_obj, false);
    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterLabel, 40));
    assert_eq!(engine.depth(), 1, "native goto-state label opens a frame");

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterLabel, 44));
    assert_eq!(engine.depth(), 1, "label with a frame updates in place");
    assert_eq!(engine.call_stack().top().unwrap().line(), 44);
}

#[test]
fn pending_kill_state_frame_unwinds_with_its_function() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let state = fx.state_frame(1, fx.pawn_obj, false);
    let tick = fx.function_frame(2, fx.pawn_obj, fx.tick, vec![]);

    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::EnterFrame, 5));
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));

    // The owner is going away; its state code never runs again, so the
    // state frame must not linger after the function returns.
    fx.vm.heap.get_mut(fx.pawn_obj).unwrap().pending_kill = true;
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::LeaveFrame, 13));
    assert_eq!(engine.depth(), 0);
}

#[test]
fn duplicate_enter_recovers_to_idle() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));

    assert_eq!(engine.depth(), 0, "corruption wipes the shadow stack");
    assert_eq!(engine.state_name(), "Idle");

    // Processing is off for the rest of the tick.
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));
    assert_eq!(engine.depth(), 0);

    // The next tick re-arms it.
    engine.begin_tick();
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));
    assert_eq!(engine.depth(), 1);
}

#[test]
fn unmatched_leave_recovers_to_idle() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    let damage = fx.function_frame(2, fx.pawn_obj, fx.take_damage, vec![]);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));
    engine.on_debug_event(&fx.vm, &ev(damage, fx.pawn_obj, DebugOpcode::LeaveFrame, 20));

    assert_eq!(engine.depth(), 0);
    assert_eq!(engine.state_name(), "Idle");
}

#[test]
fn progress_with_empty_stack_recovers() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::Statement, 12));

    assert_eq!(engine.depth(), 0);
    assert_eq!(engine.state_name(), "Idle");
}

#[test]
#[should_panic(expected = "call stack corruption")]
fn hard_fault_option_panics_on_corruption() {
    let mut fx = fixture();
    let mut engine = DebuggerEngine::new(
        RecordingUi::new(),
        RecursionLimits::default(),
        EngineOptions {
            hard_fault_on_corruption: true,
        },
    );

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::Statement, 12));
}

#[test]
fn goto_state_echo_during_function_is_dropped() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    let state = fx.state_frame(2, fx.pawn_obj, false);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));
    engine.on_debug_event(&fx.vm, &ev(state, fx.pawn_obj, DebugOpcode::Statement, 30));

    assert_eq!(engine.depth(), 1, "state echo must not touch the stack");
    assert_eq!(engine.call_stack().top().unwrap().handle, tick);
    assert_eq!(engine.call_stack().top().unwrap().line(), 12);
}

#[test]
fn events_without_debug_metadata_are_skipped() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[]);

    fx.vm.classes[fx.actor.0].has_debug_info = false;
    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));

    assert_eq!(engine.depth(), 0, "event for a non-debug class is dropped");
}

#[test]
fn exit_action_closes_the_debugger() {
    let mut fx = fixture();
    let mut engine = engine_with_actions(&[UserAction::Exit]);

    let tick = fx.function_frame(1, fx.pawn_obj, fx.tick, vec![]);
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::EnterFrame, 12));

    engine.request_break();
    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::Statement, 13));
    assert!(engine.is_closing(), "exit action must mark the engine closing");
    assert_eq!(engine.depth(), 0);

    engine.on_debug_event(&fx.vm, &ev(tick, fx.pawn_obj, DebugOpcode::Statement, 14));
    assert_eq!(engine.ui().closes, 1, "next event forwards close to the UI");
}
