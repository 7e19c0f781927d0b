//! Boundary to the interactive front-end.
//!
//! All calls are synchronous request/response; the engine owns the pacing.
//! While suspended, the engine polls `poll_action` in a loop so the host
//! can keep servicing its own message queue between polls.

/// The three watch panes of the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchChannel {
    /// Function parameters and locals of the active frame.
    Local,
    /// Fields of the active frame's object.
    Global,
    /// User-entered watch expressions.
    User,
}

/// Identifier of one row in a watch pane, assigned by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId(pub u32);

/// Discrete user commands delivered while the debugger is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Go,
    StepInto,
    StepOver,
    StepOut,
    RunToCursor,
    Exit,
}

/// Calls the engine makes outward to the front-end.
pub trait DebuggerUi {
    /// Resync the source view to a class/line location.
    fn update_location(&mut self, class: &str, package: &str, line: i32, opcode: &str, object: &str);

    /// Replace the displayed call stack, innermost frame last.
    fn update_call_stack(&mut self, frames: &[String]);

    fn lock_watch(&mut self, channel: WatchChannel);
    fn unlock_watch(&mut self, channel: WatchChannel);
    fn clear_watch(&mut self, channel: WatchChannel);

    /// Append one row to a watch pane and return its id. A `parent` of
    /// `None` makes a top-level row.
    fn add_watch_row(
        &mut self,
        channel: WatchChannel,
        parent: Option<RowId>,
        name: &str,
        value: &str,
    ) -> RowId;

    fn add_to_log(&mut self, line: &str);

    /// Bring the front-end forward when execution suspends.
    fn show(&mut self);

    /// Drop the front-end into the background when execution resumes.
    fn hide(&mut self);

    fn close(&mut self);

    /// The debuggee held exclusive mouse/keyboard capture; let go of it
    /// so the user can operate the front-end.
    fn release_input_capture(&mut self);

    /// Poll for the next queued user action. Returning `None` yields the
    /// slice back to the host message loop.
    fn poll_action(&mut self) -> Option<UserAction>;
}
