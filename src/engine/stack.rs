//! Shadow call stack reconciliation.
//!
//! The VM emits enter/leave notifications that are mostly well ordered,
//! except around latent calls and scripted state transitions, where a
//! leave or enter can arrive while an unrelated frame is still on top.
//! Those are queued and replayed in FIFO order once the stack unwinds to
//! the point they apply to. Anything else that does not line up is
//! corruption: the engine resets to Idle, wipes this stack and drops
//! events for the rest of the tick.

use std::collections::VecDeque;

use crate::engine::events::{DebugEvent, DebugOpcode};
use crate::engine::state::StateMachine;
use crate::engine::EngineEnv;
use crate::reflect::{ClassId, FrameHandle, FrameKind, ObjRef};

/// One open invocation mirrored from the VM, with the per-opcode history
/// recorded inside it.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub handle: FrameHandle,
    pub object: ObjRef,
    pub class: ClassId,
    pub kind: FrameKind,
    lines: Vec<i32>,
    positions: Vec<i32>,
    depths: Vec<usize>,
    opcodes: Vec<DebugOpcode>,
    /// One-shot: set when a breakpoint fires on this frame, re-armed at
    /// the next loop iteration boundary.
    pub breakpoint_hit: bool,
}

impl StackFrame {
    fn new(event: &DebugEvent, class: ClassId, kind: FrameKind, depth: usize) -> Self {
        Self {
            handle: event.frame,
            object: event.object,
            class,
            kind,
            lines: vec![event.line],
            positions: vec![event.pos],
            depths: vec![depth],
            opcodes: vec![event.opcode],
            breakpoint_hit: false,
        }
    }

    pub fn line(&self) -> i32 {
        *self.lines.last().unwrap_or(&0)
    }

    pub fn pos(&self) -> i32 {
        *self.positions.last().unwrap_or(&0)
    }

    pub fn last_opcode(&self) -> DebugOpcode {
        *self.opcodes.last().unwrap_or(&DebugOpcode::Statement)
    }

    /// Progress history: (line, position, depth, opcode) per notification.
    pub fn history(&self) -> impl Iterator<Item = (i32, i32, usize, DebugOpcode)> + '_ {
        self.lines
            .iter()
            .zip(&self.positions)
            .zip(&self.depths)
            .zip(&self.opcodes)
            .map(|(((l, p), d), o)| (*l, *p, *d, *o))
    }

    fn update(&mut self, line: i32, pos: i32, opcode: DebugOpcode, depth: usize) {
        self.lines.push(line);
        self.positions.push(pos);
        self.depths.push(depth);
        self.opcodes.push(opcode);

        if opcode.starts_loop_iteration() {
            self.breakpoint_hit = false;
        }
    }
}

/// A leave or enter that arrived out of order and waits for the stack to
/// unwind to its application point.
#[derive(Debug, Clone, Copy)]
pub struct QueuedCommand {
    pub frame: FrameHandle,
    pub opcode: DebugOpcode,
    pub line: i32,
}

/// Outcome of feeding one event to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
    /// The event was consumed (stack command, queued, or synthesized);
    /// the engine must not break on it.
    Absorbed,
    /// An in-place progress update; the engine continues to condition
    /// processing.
    Continue,
    /// Unexplainable mismatch; the engine must reset.
    Corrupted,
}

#[derive(Debug)]
pub struct CallStack {
    frames: Vec<StackFrame>,
    queued: VecDeque<QueuedCommand>,
    replay_active: bool,
    hard_fault: bool,
}

impl CallStack {
    pub fn new(hard_fault: bool) -> Self {
        Self {
            frames: Vec::new(),
            queued: VecDeque::new(),
            replay_active: false,
            hard_fault,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn node(&self, index: usize) -> Option<&StackFrame> {
        self.frames.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut StackFrame> {
        self.frames.get_mut(index)
    }

    pub fn top(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.queued.clear();
    }

    /// Reconcile one VM notification with the shadow stack.
    pub(crate) fn update(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        if self.frames.is_empty() && !self.replay_active {
            self.queued.clear();
        }

        match event.opcode {
            DebugOpcode::LeaveLatentCall => self.leave_latent(event, states, env),
            DebugOpcode::LeaveFrame => self.leave_frame(event, states, env),
            DebugOpcode::LeaveState => self.leave_state(event, states, env),
            DebugOpcode::EnterState => self.enter_state(event, states, env),
            DebugOpcode::EnterFrame => self.enter_frame(event, states, env),
            DebugOpcode::EnterLatentResume => {
                if !self.frames.is_empty() {
                    return self.corrupt(event, "latent resume with frames still on the stack");
                }
                self.enter_frame(event, states, env)
            }
            DebugOpcode::EnterLabel => self.enter_label(event, states, env),
            _ => self.progress(event, states, env),
        }
    }

    /// State code is about to hand control to a latent function. The
    /// state frame goes away; a synthesized progress event first parks
    /// the UI on the line making the latent call.
    fn leave_latent(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        if self.depth() != 1 {
            return self.corrupt(event, "latent leave with stack depth != 1");
        }

        let synth = DebugEvent {
            opcode: DebugOpcode::Statement,
            ..*event
        };
        if self.update(&synth, states, env) == StackOutcome::Corrupted {
            return StackOutcome::Corrupted;
        }

        states.update_stack_info(Some(self.depth() - 1), env);
        states.process(false, self, env);

        self.frames.pop();
        states.update_stack_info(None, env);
        StackOutcome::Absorbed
    }

    fn leave_frame(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        let Some(top) = self.frames.last() else {
            return self.corrupt(event, "leave with an empty stack");
        };

        if top.handle != event.frame {
            let Some(target) = env.vm.frame(event.frame) else {
                return self.corrupt(event, "leave for a frame the VM no longer describes");
            };
            if top.kind != FrameKind::State && target.kind == FrameKind::State {
                // A state transition wants its state frame gone while a
                // function frame is still executing. Replays after the
                // function unwinds, unless a latent action will consume
                // the state frame instead.
                if !target.latent_action {
                    self.queued.push_back(QueuedCommand {
                        frame: event.frame,
                        opcode: DebugOpcode::LeaveFrame,
                        line: event.line,
                    });
                }
                return StackOutcome::Absorbed;
            }
            return self.corrupt(event, "leave does not match the top frame");
        }

        self.frames.pop();

        // State code never runs again for an owner being destroyed; its
        // leave will not arrive, so unwind the state frame now.
        if self.depth() == 1 {
            let bottom = &self.frames[0];
            if bottom.kind == FrameKind::State
                && env
                    .vm
                    .heap
                    .get(bottom.object)
                    .is_some_and(|o| o.pending_kill)
            {
                self.frames.pop();
                states.update_stack_info(None, env);
                return StackOutcome::Absorbed;
            }
        }

        if self.frames.is_empty() {
            states.update_stack_info(None, env);
        } else {
            states.update_stack_info(Some(self.depth() - 1), env);
            states.process(true, self, env);
        }

        self.drain_queue(event, states, env)
    }

    /// Manual state exit: rewrite into a leave against the top frame.
    fn leave_state(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        let target_is_state = env
            .vm
            .frame(event.frame)
            .is_some_and(|f| f.kind == FrameKind::State);
        if !target_is_state {
            return self.progress(event, states, env);
        }

        let Some(top) = self.frames.last() else {
            return self.corrupt(event, "state leave with an empty stack");
        };

        let rewritten = if top.kind != FrameKind::State {
            DebugEvent {
                frame: event.frame,
                object: event.object,
                opcode: DebugOpcode::LeaveFrame,
                line: top.line(),
                pos: top.pos(),
            }
        } else {
            DebugEvent {
                frame: top.handle,
                object: event.object,
                opcode: DebugOpcode::LeaveFrame,
                line: top.line() + 1,
                pos: top.pos(),
            }
        };

        match self.update(&rewritten, states, env) {
            StackOutcome::Corrupted => StackOutcome::Corrupted,
            _ => StackOutcome::Absorbed,
        }
    }

    /// Returning to state scope via a popped state transition. With a
    /// function frame still on top, the enter waits in the queue.
    fn enter_state(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        let target_is_state = env
            .vm
            .frame(event.frame)
            .is_some_and(|f| f.kind == FrameKind::State);
        if !target_is_state {
            return self.progress(event, states, env);
        }

        if let Some(top) = self.frames.last() {
            if top.kind != FrameKind::State {
                self.queued.push_back(QueuedCommand {
                    frame: event.frame,
                    opcode: DebugOpcode::EnterFrame,
                    line: event.line,
                });
                return StackOutcome::Absorbed;
            }
        }

        let enter = DebugEvent {
            opcode: DebugOpcode::EnterFrame,
            ..*event
        };
        self.update(&enter, states, env)
    }

    fn enter_frame(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        if let Some(top) = self.frames.last() {
            if top.handle == event.frame {
                return self.corrupt(event, "duplicate enter for the frame already on top");
            }
        }

        let Some(frame) = env.vm.frame(event.frame) else {
            return self.corrupt(event, "enter for a frame the VM no longer describes");
        };
        let Some(class) = env.vm.frame_owner_class(frame) else {
            return self.corrupt(event, "enter for a frame with no owning class");
        };

        let depth = self.depth();
        self.frames
            .push(StackFrame::new(event, class, frame.kind, depth));

        states.update_stack_info(Some(self.depth() - 1), env);
        states.process(false, self, env);
        StackOutcome::Absorbed
    }

    /// Labels update the top frame in place. A label with no open frame
    /// comes from a native goto-state and behaves as an enter.
    fn enter_label(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        if self.frames.is_empty() {
            return self.enter_frame(event, states, env);
        }

        let depth = self.depth();
        let top = self.frames.last_mut().expect("non-empty stack");
        top.update(event.line, event.pos, event.opcode, depth);
        StackOutcome::Continue
    }

    fn progress(
        &mut self,
        event: &DebugEvent,
        _states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        if self.frames.is_empty() {
            return self.corrupt(event, "progress event with an empty stack");
        }

        let depth = self.depth();
        let top = self.frames.last().expect("non-empty stack");
        if top.handle != event.frame {
            let target_is_state = env
                .vm
                .frame(event.frame)
                .is_some_and(|f| f.kind == FrameKind::State);
            if top.kind != FrameKind::State && target_is_state {
                // Echo of a scripted goto-state while a function is
                // executing; the state frame will be dealt with later.
                return StackOutcome::Absorbed;
            }
            return self.corrupt(event, "progress event does not match the top frame");
        }

        let top = self.frames.last_mut().expect("non-empty stack");
        top.update(event.line, event.pos, event.opcode, depth);

        if event.opcode == DebugOpcode::ForInit {
            StackOutcome::Absorbed
        } else {
            StackOutcome::Continue
        }
    }

    /// After a pop, replay deferred commands once the queue head applies
    /// to the new top (or the stack emptied). Leaves whose target frame
    /// is already gone are dropped.
    fn drain_queue(
        &mut self,
        event: &DebugEvent,
        states: &mut StateMachine,
        env: &mut EngineEnv<'_>,
    ) -> StackOutcome {
        if self.replay_active || self.queued.is_empty() {
            return StackOutcome::Absorbed;
        }

        if self.frames.is_empty() {
            while self
                .queued
                .front()
                .is_some_and(|c| c.opcode == DebugOpcode::LeaveFrame)
            {
                self.queued.pop_front();
            }
            if self.queued.is_empty() {
                return StackOutcome::Absorbed;
            }
        }

        let head_applies = match self.frames.last() {
            None => true,
            Some(top) => self.queued.front().is_some_and(|c| c.frame == top.handle),
        };
        if !head_applies {
            return StackOutcome::Absorbed;
        }

        self.replay_active = true;
        let mut remaining = self.queued.len();
        while remaining > 0 {
            remaining -= 1;
            let Some(command) = self.queued.pop_front() else {
                break;
            };
            let line = if command.line == 0 {
                self.frames.last().map_or(command.line, |t| t.line())
            } else {
                command.line
            };

            states.commit_pending();
            let replay = DebugEvent {
                frame: command.frame,
                object: event.object,
                opcode: command.opcode,
                line,
                pos: event.pos,
            };
            if self.update(&replay, states, env) == StackOutcome::Corrupted {
                self.replay_active = false;
                return StackOutcome::Corrupted;
            }
        }
        self.replay_active = false;

        StackOutcome::Absorbed
    }

    fn corrupt(&mut self, event: &DebugEvent, reason: &str) -> StackOutcome {
        log::warn!(
            "call stack corruption: {reason} (opcode {:?}, line {}, depth {}, queued {})",
            event.opcode,
            event.line,
            self.depth(),
            self.queued.len(),
        );
        if self.hard_fault {
            panic!("call stack corruption: {reason}");
        }
        StackOutcome::Corrupted
    }
}
