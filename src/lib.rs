//! Source-level debugger engine for a managed scripting VM.
//!
//! The VM drives the engine through a per-opcode instrumentation hook;
//! the engine mirrors the VM call stack, decides when execution should
//! suspend (breakpoints, stepping, data watches) and resolves user watch
//! expressions against live script memory through the reflection surface.
//! The interactive front-end sits behind the [`ui::DebuggerUi`] trait.

pub mod config;
pub mod engine;
pub mod error;
pub mod reflect;
pub mod ui;
pub mod watch;

pub use config::{EngineOptions, RecursionLimit, RecursionLimits};
pub use engine::{
    BreakpointRegistry, CallStack, DebugEvent, DebugOpcode, DebuggerEngine, DebuggerState,
    StackFrame, StackOutcome, StateKind, StateMachine,
};
pub use error::{ConfigError, WatchError};
pub use ui::{DebuggerUi, RowId, UserAction, WatchChannel};
pub use watch::{DataWatch, WatchExpression};
