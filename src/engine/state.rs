//! Execution-control state machine.
//!
//! Exactly one state is current at any time, with at most one pending
//! state committed through a two-phase handshake: the current state gets
//! first refusal (`BreakOnChange` absorbs any incoming state into its
//! sub-state slot), otherwise the incoming state decides whether the
//! outgoing one is adopted or dropped.

use crate::engine::stack::CallStack;
use crate::engine::{scope_for, update_interface, EngineEnv, EngineFlags};
use crate::ui::UserAction;
use crate::watch::DataWatch;

#[derive(Debug)]
pub enum StateKind {
    /// Dormant: the debuggee runs free and no conditions are polled.
    Idle,
    /// Suspended, pumping the host action queue.
    WaitForInput { resume: bool },
    /// Free-running with the base breakpoint condition polled per event.
    WaitForCondition,
    /// Cursor matching is an accepted, inert slot; behaves as
    /// `WaitForCondition`.
    RunToCursor,
    StepOut { depth: usize },
    StepInto { depth: usize, line: i32 },
    StepOverStack { depth: usize },
    /// Decorator: breaks when a watched field's bytes change, otherwise
    /// defers to the decorated sub-state.
    BreakOnChange {
        watch: DataWatch,
        sub: Option<Box<DebuggerState>>,
        data_break: bool,
    },
}

#[derive(Debug)]
pub struct DebuggerState {
    kind: StateKind,
    node: Option<usize>,
}

impl DebuggerState {
    pub fn idle(flags: &mut EngineFlags) -> Self {
        flags.active = false;
        Self {
            kind: StateKind::Idle,
            node: None,
        }
    }

    pub fn wait_for_input(flags: &mut EngineFlags) -> Self {
        flags.active = true;
        Self {
            kind: StateKind::WaitForInput { resume: false },
            node: None,
        }
    }

    pub fn wait_for_condition(flags: &mut EngineFlags) -> Self {
        flags.active = false;
        Self {
            kind: StateKind::WaitForCondition,
            node: None,
        }
    }

    pub fn run_to_cursor(flags: &mut EngineFlags) -> Self {
        flags.active = false;
        Self {
            kind: StateKind::RunToCursor,
            node: None,
        }
    }

    pub fn step_out(depth: usize, flags: &mut EngineFlags) -> Self {
        flags.active = false;
        Self {
            kind: StateKind::StepOut { depth },
            node: None,
        }
    }

    pub fn step_into(depth: usize, line: i32, flags: &mut EngineFlags) -> Self {
        flags.active = false;
        Self {
            kind: StateKind::StepInto { depth, line },
            node: None,
        }
    }

    pub fn step_over_stack(depth: usize, flags: &mut EngineFlags) -> Self {
        flags.active = false;
        Self {
            kind: StateKind::StepOverStack { depth },
            node: None,
        }
    }

    pub fn break_on_change(watch_text: &str, flags: &mut EngineFlags) -> Self {
        flags.active = false;
        Self {
            kind: StateKind::BreakOnChange {
                watch: DataWatch::new(watch_text),
                sub: None,
                data_break: false,
            },
            node: None,
        }
    }

    pub fn kind(&self) -> &StateKind {
        &self.kind
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            StateKind::Idle => "Idle",
            StateKind::WaitForInput { .. } => "WaitForInput",
            StateKind::WaitForCondition => "WaitForCondition",
            StateKind::RunToCursor => "RunToCursor",
            StateKind::StepOut { .. } => "StepOut",
            StateKind::StepInto { .. } => "StepInto",
            StateKind::StepOverStack { .. } => "StepOverStack",
            StateKind::BreakOnChange { .. } => "BreakOnChange",
        }
    }

    /// The state's view of the active frame. `BreakOnChange` delegates
    /// to its sub-state.
    pub fn node(&self) -> Option<usize> {
        match &self.kind {
            StateKind::BreakOnChange { sub: Some(sub), .. } => sub.node(),
            _ => self.node,
        }
    }

    fn set_node(&mut self, node: Option<usize>) {
        match &mut self.kind {
            StateKind::BreakOnChange { sub: Some(sub), .. } => sub.set_node(node),
            _ => self.node = node,
        }
    }

    /// Whether this state (or the sub-state it decorates) is the
    /// suspension point, and if so whether it has been resumed.
    fn wait_for_input_resume(&self) -> Option<bool> {
        match &self.kind {
            StateKind::WaitForInput { resume } => Some(*resume),
            StateKind::BreakOnChange { sub: Some(sub), .. } => sub.wait_for_input_resume(),
            _ => None,
        }
    }

    fn set_wait_resume(&mut self, value: bool) {
        match &mut self.kind {
            StateKind::WaitForInput { resume } => *resume = value,
            StateKind::BreakOnChange { sub: Some(sub), .. } => sub.set_wait_resume(value),
            _ => {}
        }
    }

    /// First refusal on an incoming transition. Returns the state back
    /// when it is not absorbed.
    fn try_absorb(&mut self, new: DebuggerState) -> Option<DebuggerState> {
        match &mut self.kind {
            StateKind::BreakOnChange { sub, .. } => {
                let new = match sub {
                    Some(existing) => match existing.try_absorb(new) {
                        None => return None,
                        Some(new) => new,
                    },
                    None => new,
                };
                *sub = Some(Box::new(new));
                None
            }
            _ => Some(new),
        }
    }

    /// Decide the outgoing state's fate after this state replaced it.
    /// A fresh `BreakOnChange` adopts it as the decorated sub-state;
    /// everything else lets it drop.
    fn adopt_old(&mut self, old: DebuggerState) {
        if let StateKind::BreakOnChange { sub: sub @ None, .. } = &mut self.kind {
            *sub = Some(Box::new(old));
        }
    }
}

enum InputRequest {
    None,
    Run,
    StepInto,
    StepOver,
    StepOut,
    RunToCursor,
    Exit,
}

fn state_handle_input(state: &mut DebuggerState, action: UserAction) -> InputRequest {
    match &mut state.kind {
        StateKind::BreakOnChange {
            watch,
            sub,
            data_break,
        } => {
            if action != UserAction::Exit && *data_break {
                // Pick up the just-seen value as the new comparison base.
                watch.reset();
            }
            *data_break = false;
            match sub {
                Some(sub) => state_handle_input(sub, action),
                None => InputRequest::None,
            }
        }
        StateKind::WaitForInput { resume } => {
            *resume = true;
            match action {
                UserAction::Go => InputRequest::Run,
                UserAction::StepInto => InputRequest::StepInto,
                UserAction::StepOver => InputRequest::StepOver,
                UserAction::StepOut => InputRequest::StepOut,
                UserAction::RunToCursor => InputRequest::RunToCursor,
                UserAction::Exit => InputRequest::Exit,
            }
        }
        _ => InputRequest::None,
    }
}

#[derive(Debug)]
pub struct StateMachine {
    current: DebuggerState,
    pending: Option<DebuggerState>,
}

impl StateMachine {
    pub fn new(flags: &mut EngineFlags) -> Self {
        Self {
            current: DebuggerState::idle(flags),
            pending: None,
        }
    }

    pub fn current(&self) -> &DebuggerState {
        &self.current
    }

    pub fn pending(&self) -> Option<&DebuggerState> {
        self.pending.as_ref()
    }

    /// Record a pending transition, discarding any uncommitted one.
    pub fn request(&mut self, state: DebuggerState) {
        self.pending = Some(state);
    }

    /// Commit a pending transition through the intercept handshake.
    pub fn commit_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match self.current.try_absorb(pending) {
            None => {}
            Some(pending) => {
                let old = std::mem::replace(&mut self.current, pending);
                self.current.adopt_old(old);
            }
        }
    }

    /// Hard reset used by corruption recovery and close.
    pub(crate) fn force_idle(&mut self, flags: &mut EngineFlags) {
        self.current = DebuggerState::idle(flags);
        self.pending = None;
    }

    /// Point the current state at a shadow-stack frame (or at nothing
    /// when the stack emptied). Deactivates the debugger on a lost frame.
    pub(crate) fn update_stack_info(&mut self, node: Option<usize>, env: &mut EngineEnv<'_>) {
        if (env.flags.active && node != self.current.node()) || node.is_none() {
            *env.stack_position = node;
            if node.is_none() {
                env.flags.active = false;
            }
        }
        self.current.set_node(node);
    }

    fn active_node_index(&self, stack: &CallStack) -> Option<usize> {
        self.current
            .node()
            .filter(|&i| i < stack.depth())
            .or_else(|| stack.depth().checked_sub(1))
    }

    /// Transition to WaitForInput immediately and suspend.
    pub(crate) fn break_now(&mut self, stack: &mut CallStack, env: &mut EngineEnv<'_>) {
        env.flags.accessed_none = false;
        env.flags.break_asap = false;

        let node = self.current.node();
        let mut pending = DebuggerState::wait_for_input(env.flags);
        pending.set_node(node);
        self.pending = Some(pending);
        self.commit_pending();

        env.ui.release_input_capture();
        self.process(false, stack, env);
    }

    /// Ask the current state whether execution should suspend here.
    pub(crate) fn process(&mut self, optional: bool, stack: &mut CallStack, env: &mut EngineEnv<'_>) {
        if matches!(self.current.kind, StateKind::WaitForInput { .. }) {
            self.process_wait_for_input(stack, env);
            return;
        }
        if env.flags.closing || stack.depth() == 0 {
            return;
        }

        // The condition family only breaks on nodes with a real source
        // line; Idle and the data-break decorator have no such guard.
        let needs_line = !matches!(
            self.current.kind,
            StateKind::Idle | StateKind::BreakOnChange { .. }
        );
        if needs_line {
            let line_ok = self
                .active_node_index(stack)
                .and_then(|i| stack.node(i))
                .is_some_and(|n| n.line() > 0);
            if !line_ok {
                return;
            }
        }

        if self.evaluate_current(optional, stack, env) {
            self.break_now(stack, env);
            return;
        }

        // A decorated suspension still suspends: the break-on-change
        // wrapper defers to the WaitForInput it absorbed.
        if matches!(self.current.kind, StateKind::BreakOnChange { .. })
            && self.current.wait_for_input_resume().is_some()
        {
            self.process_wait_for_input(stack, env);
        }
    }

    fn evaluate_current(&mut self, optional: bool, stack: &mut CallStack, env: &mut EngineEnv<'_>) -> bool {
        let node = self.active_node_index(stack);
        evaluate_state(&mut self.current, node, optional, stack, env)
    }

    /// The one suspension point: publish the current location and watch
    /// data, then pump host actions until execution resumes.
    fn process_wait_for_input(&mut self, stack: &mut CallStack, env: &mut EngineEnv<'_>) {
        if env.flags.closing {
            return;
        }

        env.flags.accessed_none = false;
        env.flags.break_asap = false;

        update_interface(stack, env);
        self.current.set_wait_resume(false);
        env.ui.show();

        loop {
            if env.flags.closing {
                break;
            }
            if self.current.wait_for_input_resume() != Some(false) {
                break;
            }
            match env.ui.poll_action() {
                Some(action) => self.handle_input(action, stack, env),
                None => std::thread::yield_now(),
            }
        }

        if !env.flags.closing {
            env.ui.hide();
        }
    }

    /// Route a user action into the current state.
    pub(crate) fn handle_input(
        &mut self,
        action: UserAction,
        stack: &mut CallStack,
        env: &mut EngineEnv<'_>,
    ) {
        let request = state_handle_input(&mut self.current, action);
        let line = self
            .active_node_index(stack)
            .and_then(|i| stack.node(i))
            .map_or(0, |n| n.line());
        let depth = stack.depth();

        match request {
            InputRequest::None => {}
            InputRequest::Run => self.request(DebuggerState::wait_for_condition(env.flags)),
            InputRequest::StepInto => {
                self.request(DebuggerState::step_into(depth, line, env.flags))
            }
            InputRequest::StepOver => {
                self.request(DebuggerState::step_over_stack(depth, env.flags))
            }
            InputRequest::StepOut => self.request(DebuggerState::step_out(depth, env.flags)),
            InputRequest::RunToCursor => self.request(DebuggerState::run_to_cursor(env.flags)),
            InputRequest::Exit => {
                env.flags.closing = true;
                env.flags.active = false;
                *env.stack_position = None;
                self.current.set_node(None);
                stack.clear();
                self.request(DebuggerState::idle(env.flags));
            }
        }
    }
}

/// Shared condition table. Panics when called with an empty call stack;
/// that is a caller bug, never an event-stream problem.
fn evaluate_state(
    state: &mut DebuggerState,
    node: Option<usize>,
    optional: bool,
    stack: &mut CallStack,
    env: &mut EngineEnv<'_>,
) -> bool {
    assert!(
        stack.depth() > 0,
        "evaluated a debugger condition with an empty call stack"
    );
    let node_idx = node
        .filter(|&i| i < stack.depth())
        .unwrap_or(stack.depth() - 1);

    match &mut state.kind {
        StateKind::Idle => env.flags.break_asap,
        StateKind::WaitForInput { .. } => false,
        StateKind::WaitForCondition | StateKind::RunToCursor => {
            base_condition(node_idx, stack, env)
        }
        StateKind::StepOut { depth } => {
            if stack.depth() >= *depth {
                base_condition(node_idx, stack, env)
            } else {
                true
            }
        }
        StateKind::StepInto { depth, line } => {
            let current_line = stack.node(node_idx).map_or(0, |n| n.line());
            stack.depth() != *depth || current_line != *line
        }
        StateKind::StepOverStack { depth } => {
            let d = stack.depth();
            if d < *depth {
                true
            } else if d == *depth {
                if optional {
                    base_condition(node_idx, stack, env)
                } else {
                    true
                }
            } else {
                false
            }
        }
        StateKind::BreakOnChange {
            watch,
            sub,
            data_break,
        } => {
            if let Some(node) = stack.node(node_idx) {
                if let Some(scope) = scope_for(env.vm, node) {
                    if watch.modified(&scope) {
                        *data_break = true;
                        return true;
                    }
                }
            }
            match sub {
                Some(sub) => evaluate_state(sub, Some(node_idx), optional, stack, env),
                None => base_condition(node_idx, stack, env),
            }
        }
    }
}

/// Base breakpoint condition shared by every state: an enabled breakpoint
/// at the frame's (class, line), at most once per loop iteration.
fn base_condition(node_idx: usize, stack: &mut CallStack, env: &EngineEnv<'_>) -> bool {
    let Some(node) = stack.node_mut(node_idx) else {
        return false;
    };
    if node.breakpoint_hit {
        return false;
    }
    let class_path = env.vm.class_path(node.class);
    if env.breakpoints.query(&class_path, node.line()) {
        node.breakpoint_hit = true;
        return true;
    }
    false
}
