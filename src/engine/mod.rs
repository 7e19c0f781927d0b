//! The debugger engine facade.
//!
//! One engine instance is constructed by the host and injected into the
//! VM's instrumentation hook; `on_debug_event` is invoked once per debug
//! opcode. Everything here is single-threaded and cooperative; the only
//! suspension point is the WaitForInput action pump.

pub mod breakpoints;
pub mod events;
pub mod stack;
pub mod state;

use std::path::PathBuf;

use crate::config::{EngineOptions, RecursionLimits};
use crate::error::ConfigError;
use crate::reflect::{FrameKind, Vm};
use crate::ui::{DebuggerUi, UserAction, WatchChannel};
use crate::watch::present::WatchPresenter;
use crate::watch::{WatchExpression, WatchScope};

pub use breakpoints::BreakpointRegistry;
pub use events::{DebugEvent, DebugOpcode};
pub use stack::{CallStack, StackFrame, StackOutcome};
pub use state::{DebuggerState, StateKind, StateMachine};

/// Sticky engine-wide flags consulted on every event.
#[derive(Debug, Default)]
pub struct EngineFlags {
    /// The debugger is interactive (suspended or stepping).
    pub active: bool,
    pub closing: bool,
    /// Cleared on corruption, re-armed by `begin_tick`.
    pub processing_enabled: bool,
    /// The VM reported an access through a null reference.
    pub accessed_none: bool,
    pub break_on_none: bool,
    /// Break at the next processed opcode.
    pub break_asap: bool,
}

/// Split borrow of the engine handed to the tracker and state machine.
pub(crate) struct EngineEnv<'a> {
    pub vm: &'a Vm,
    pub ui: &'a mut dyn DebuggerUi,
    pub flags: &'a mut EngineFlags,
    pub breakpoints: &'a BreakpointRegistry,
    pub watches: &'a [WatchExpression],
    pub limits: &'a RecursionLimits,
    pub stack_position: &'a mut Option<usize>,
}

/// Build a watch evaluation scope for a shadow-stack node.
pub(crate) fn scope_for<'vm>(vm: &'vm Vm, node: &StackFrame) -> Option<WatchScope<'vm>> {
    let frame = vm.frame(node.handle)?;
    Some(WatchScope {
        vm,
        object: frame.object,
        class: node.class,
        function: frame.function,
        locals: &frame.locals,
    })
}

fn describe_frame(vm: &Vm, node: &StackFrame) -> String {
    let path = vm.class_path(node.class);
    match vm.frame(node.handle).and_then(|f| f.function) {
        Some(fun) => format!("Function {path}.{}", vm.function(fun).name),
        None => match node.kind {
            FrameKind::State => format!("State {path}"),
            FrameKind::Label => format!("Label {path}"),
            FrameKind::Function => format!("Function {path}"),
        },
    }
}

/// Push the active location, call stack and all three watch panes to the
/// front-end. Runs when execution suspends.
pub(crate) fn update_interface(stack: &CallStack, env: &mut EngineEnv<'_>) {
    let Some(top) = stack.depth().checked_sub(1) else {
        return;
    };
    refresh_location(stack, top, env);
    refresh_watch_panes(stack, top, env);

    let names: Vec<String> = stack
        .frames()
        .iter()
        .map(|f| describe_frame(env.vm, f))
        .collect();
    env.ui.update_call_stack(&names);
}

fn refresh_location(stack: &CallStack, node_idx: usize, env: &mut EngineEnv<'_>) {
    let Some(node) = stack.node(node_idx) else {
        return;
    };
    let class = env.vm.class(node.class);
    let object = env
        .vm
        .heap
        .get(node.object)
        .map_or_else(|| "None".to_string(), |o| o.name.clone());
    env.ui.update_location(
        &class.name,
        &class.package,
        node.line(),
        node.last_opcode().label(),
        &object,
    );
}

/// Rebuild all three watch panes from the given node's memory.
fn refresh_watch_panes(stack: &CallStack, node_idx: usize, env: &mut EngineEnv<'_>) {
    for channel in [WatchChannel::Local, WatchChannel::Global, WatchChannel::User] {
        env.ui.lock_watch(channel);
        env.ui.clear_watch(channel);
    }

    if let Some(node) = stack.node(node_idx) {
        if let Some(frame) = env.vm.frame(node.handle) {
            let mut presenter = WatchPresenter::new(env.vm, &mut *env.ui, env.limits);
            if let Some(fun) = frame.function {
                presenter.present_locals(
                    WatchChannel::Local,
                    &env.vm.function(fun).locals,
                    &frame.locals,
                );
            }
            presenter.present_object_fields(WatchChannel::Global, frame.object, None, false);
        }
        refresh_user_watches(stack, node_idx, env);
    }

    for channel in [WatchChannel::Local, WatchChannel::Global, WatchChannel::User] {
        env.ui.unlock_watch(channel);
    }
}

/// Re-resolve every user watch against the given node. Resolution errors
/// become the row's value; they never fail the refresh.
fn refresh_user_watches(stack: &CallStack, node_idx: usize, env: &mut EngineEnv<'_>) {
    let Some(node) = stack.node(node_idx) else {
        return;
    };
    let Some(scope) = scope_for(env.vm, node) else {
        return;
    };

    for watch in env.watches {
        match watch.resolve(&scope) {
            Ok(resolved) => {
                let mut presenter = WatchPresenter::new(env.vm, &mut *env.ui, env.limits);
                presenter.present_root(
                    WatchChannel::User,
                    &watch.text,
                    &resolved.kind,
                    resolved.value,
                    None,
                );
            }
            Err(error) => {
                env.ui
                    .add_watch_row(WatchChannel::User, None, &watch.text, &error.to_string());
            }
        }
    }
}

/// The source-level debugger engine.
pub struct DebuggerEngine<U: DebuggerUi> {
    ui: U,
    states: StateMachine,
    stack: CallStack,
    breakpoints: BreakpointRegistry,
    watches: Vec<WatchExpression>,
    limits: RecursionLimits,
    flags: EngineFlags,
    stack_position: Option<usize>,
    /// Accepted from the front-end; currently inert.
    condition: Option<(String, String)>,
    settings_path: Option<PathBuf>,
}

impl<U: DebuggerUi> DebuggerEngine<U> {
    pub fn new(mut ui: U, limits: RecursionLimits, options: EngineOptions) -> Self {
        let mut flags = EngineFlags {
            processing_enabled: true,
            ..EngineFlags::default()
        };
        let states = StateMachine::new(&mut flags);

        log::info!("script debugger engine initialized");
        ui.add_to_log("Init: Script debugger engine initialized");

        Self {
            ui,
            states,
            stack: CallStack::new(options.hard_fault_on_corruption),
            breakpoints: BreakpointRegistry::new(),
            watches: Vec::new(),
            limits,
            flags,
            stack_position: None,
            condition: None,
            settings_path: None,
        }
    }

    /// Construct with limits loaded from (and later stored to) a
    /// settings file.
    pub fn with_settings(
        ui: U,
        path: PathBuf,
        options: EngineOptions,
    ) -> Result<Self, ConfigError> {
        let limits = RecursionLimits::load(&path)?;
        let mut engine = Self::new(ui, limits, options);
        engine.settings_path = Some(path);
        Ok(engine)
    }

    /// Write the recursion limits back to the settings file, if any.
    pub fn save_settings(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.settings_path {
            self.limits.store(path)?;
        }
        Ok(())
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn state_name(&self) -> &'static str {
        self.states.current().name()
    }

    pub fn states(&self) -> &StateMachine {
        &self.states
    }

    pub fn is_closing(&self) -> bool {
        self.flags.closing
    }

    pub fn is_active(&self) -> bool {
        self.flags.active
    }

    pub fn limits(&self) -> &RecursionLimits {
        &self.limits
    }

    pub fn limits_mut(&mut self) -> &mut RecursionLimits {
        &mut self.limits
    }

    /// The VM starts a new tick: event processing is re-enabled after a
    /// corruption shutdown.
    pub fn begin_tick(&mut self) {
        self.flags.processing_enabled = true;
    }

    /// Per-opcode entry point, invoked by the VM instrumentation hook.
    pub fn on_debug_event(&mut self, vm: &Vm, event: &DebugEvent) {
        if !self.flags.processing_enabled {
            return;
        }

        let Some(frame) = vm.frame(event.frame) else {
            log::debug!("dropping event for unknown frame {:?}", event.frame);
            return;
        };
        match vm.frame_owner_class(frame) {
            Some(class) if !vm.class(class).has_debug_info => {
                log::warn!(
                    "class '{}' was not compiled with debug info",
                    vm.class_path(class)
                );
                return;
            }
            None => {
                log::debug!("dropping event for frame with no owning class");
                return;
            }
            Some(_) => {}
        }

        self.states.commit_pending();

        if self.flags.closing {
            self.ui.close();
            return;
        }

        let Self {
            ui,
            states,
            stack,
            breakpoints,
            watches,
            limits,
            flags,
            stack_position,
            ..
        } = self;
        let mut env = EngineEnv {
            vm,
            ui,
            flags,
            breakpoints,
            watches: watches.as_slice(),
            limits,
            stack_position,
        };

        let outcome = stack.update(event, states, &mut env);
        if outcome == StackOutcome::Corrupted {
            drop(env);
            self.recover_from_corruption();
            return;
        }
        if outcome == StackOutcome::Absorbed {
            return;
        }

        if stack.depth() > 0 {
            let top = stack.depth() - 1;
            states.update_stack_info(Some(top), &mut env);
            if env.flags.active && *env.stack_position != Some(top) {
                // A genuinely new active frame: resync the source view
                // and rebind user watches.
                *env.stack_position = Some(top);
                refresh_location(stack, top, &mut env);
                env.ui.lock_watch(WatchChannel::User);
                env.ui.clear_watch(WatchChannel::User);
                refresh_user_watches(stack, top, &mut env);
                env.ui.unlock_watch(WatchChannel::User);
            }

            if (env.flags.accessed_none && env.flags.break_on_none) || env.flags.break_asap {
                states.break_now(stack, &mut env);
            } else {
                states.process(false, stack, &mut env);
            }
        }
    }

    fn recover_from_corruption(&mut self) {
        log::warn!("resetting debugger after call stack corruption");
        self.flags.processing_enabled = false;
        self.states.force_idle(&mut self.flags);
        self.stack.clear();
        self.stack_position = None;
    }

    /// Route a queued user action to the current state (used by hosts
    /// that deliver actions outside the suspension pump).
    pub fn handle_action(&mut self, vm: &Vm, action: UserAction) {
        let Self {
            ui,
            states,
            stack,
            breakpoints,
            watches,
            limits,
            flags,
            stack_position,
            ..
        } = self;
        let mut env = EngineEnv {
            vm,
            ui,
            flags,
            breakpoints,
            watches: watches.as_slice(),
            limits,
            stack_position,
        };
        states.handle_input(action, stack, &mut env);
    }

    pub fn add_breakpoint(&mut self, class_path: &str, line: i32) {
        self.breakpoints.set(class_path, line);
    }

    pub fn remove_breakpoint(&mut self, class_path: &str, line: i32) {
        self.breakpoints.remove(class_path, line);
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    /// Add a user watch. While suspended, the user pane refreshes right
    /// away so the new row appears without stepping.
    pub fn add_watch(&mut self, vm: &Vm, text: &str) {
        self.watches.push(WatchExpression::parse(text));

        if !self.flags.active {
            return;
        }
        let node_idx = self
            .stack_position
            .filter(|&i| i < self.stack.depth())
            .or_else(|| self.states.current().node())
            .or_else(|| self.stack.depth().checked_sub(1));
        let Some(node_idx) = node_idx else {
            return;
        };

        let Self {
            ui,
            stack,
            breakpoints,
            watches,
            limits,
            flags,
            stack_position,
            ..
        } = self;
        let mut env = EngineEnv {
            vm,
            ui,
            flags,
            breakpoints,
            watches: watches.as_slice(),
            limits,
            stack_position,
        };
        env.ui.lock_watch(WatchChannel::User);
        env.ui.clear_watch(WatchChannel::User);
        refresh_user_watches(stack, node_idx, &mut env);
        env.ui.unlock_watch(WatchChannel::User);
    }

    /// Remove the first watch matching the given text.
    pub fn remove_watch(&mut self, text: &str) {
        if let Some(index) = self.watches.iter().position(|w| w.text == text) {
            self.watches.remove(index);
        }
    }

    pub fn clear_watches(&mut self) {
        self.watches.clear();
    }

    pub fn watches(&self) -> &[WatchExpression] {
        &self.watches
    }

    /// Install a data watch: a `BreakOnChange` decorator wrapping the
    /// current state.
    pub fn set_data_watch(&mut self, text: &str) {
        if self.flags.closing {
            return;
        }
        let state = DebuggerState::break_on_change(text, &mut self.flags);
        self.states.request(state);
    }

    /// Accepted from the front-end; stored but currently inert.
    pub fn set_condition(&mut self, name: &str, value: &str) {
        if self.flags.closing {
            return;
        }
        self.condition = Some((name.to_string(), value.to_string()));
    }

    pub fn condition(&self) -> Option<&(String, String)> {
        self.condition.as_ref()
    }

    /// Sticky break request: suspends at the next processed opcode.
    pub fn request_break(&mut self) {
        self.flags.break_asap = true;
    }

    pub fn set_break_on_none(&mut self, enabled: bool) {
        self.flags.break_on_none = enabled;
    }

    pub fn toggle_break_on_none(&mut self) {
        self.flags.break_on_none = !self.flags.break_on_none;
    }

    /// The VM reports a field access through a null reference.
    pub fn notify_accessed_none(&mut self) {
        self.flags.accessed_none = true;
    }

    /// Script assertion failure: suspend immediately. Returns whether the
    /// debugger survives (the host aborts otherwise).
    pub fn notify_assertion_failed(&mut self, vm: &Vm, line: i32) -> bool {
        if self.flags.closing {
            return false;
        }
        log::warn!("script assertion failed at line {line}");
        self.ui
            .add_to_log(&format!("Warning: assertion failed, line {line}"));
        self.break_immediately(vm);
        !self.flags.closing
    }

    /// Script recursion limit reached: suspend immediately.
    pub fn notify_infinite_loop(&mut self, vm: &Vm) -> bool {
        if self.flags.closing {
            return false;
        }
        log::warn!("script recursion limit reached, breaking debugger");
        self.ui
            .add_to_log("Warning: recursion limit reached, breaking debugger");
        self.break_immediately(vm);
        !self.flags.closing
    }

    fn break_immediately(&mut self, vm: &Vm) {
        let Self {
            ui,
            states,
            stack,
            breakpoints,
            watches,
            limits,
            flags,
            stack_position,
            ..
        } = self;
        let mut env = EngineEnv {
            vm,
            ui,
            flags,
            breakpoints,
            watches: watches.as_slice(),
            limits,
            stack_position,
        };
        states.break_now(stack, &mut env);
    }

    /// Select another frame of the suspended call stack. `index` counts
    /// from the top: 0 is the innermost frame.
    pub fn change_stack(&mut self, vm: &Vm, index: usize) {
        let Some(node_idx) = self.stack.depth().checked_sub(index + 1) else {
            return;
        };
        self.stack_position = Some(node_idx);

        let Self {
            ui,
            stack,
            breakpoints,
            watches,
            limits,
            flags,
            stack_position,
            ..
        } = self;
        let mut env = EngineEnv {
            vm,
            ui,
            flags,
            breakpoints,
            watches: watches.as_slice(),
            limits,
            stack_position,
        };
        refresh_location(stack, node_idx, &mut env);
        refresh_watch_panes(stack, node_idx, &mut env);
    }

    /// Cooperative shutdown: honored at the next opcode entry or inside
    /// the suspension pump.
    pub fn stop_debugging(&mut self) {
        if self.flags.closing {
            return;
        }
        self.flags.closing = true;
        self.stack.clear();
        self.stack_position = None;
        self.states.force_idle(&mut self.flags);

        log::info!("script debugger closing");
        self.ui.add_to_log("Exit: script debugger closing");
    }

    /// Structured dump of the shadow stack for diagnostics.
    pub fn dump_stack(&self, vm: &Vm) {
        log::debug!("callstack dump, depth {}", self.stack.depth());
        for (i, node) in self.stack.frames().iter().enumerate() {
            log::debug!(
                "{i}) class '{}' object {:?} kind {:?}",
                vm.class_path(node.class),
                node.object,
                node.kind
            );
            for (line, pos, depth, opcode) in node.history() {
                log::debug!("   line {line} pos {pos} depth {depth} opcode {}", opcode.label());
            }
        }
    }

    /// One-line summary of the engine state for diagnostics.
    pub fn describe(&self) -> String {
        format!(
            "active: {}\tprocessing: {}\tbreak_asap: {}\tcurrent: {}\tpending: {}",
            self.flags.active,
            self.flags.processing_enabled,
            self.flags.break_asap,
            self.states.current().name(),
            self.states.pending().map_or("None", |s| s.name()),
        )
    }
}
