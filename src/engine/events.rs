use crate::reflect::{FrameHandle, ObjRef};

/// Per-opcode debug notification kinds emitted by the VM.
///
/// The first group changes the call stack; the rest are in-frame progress
/// markers. `ForInit` never becomes a break site, and the loop-head
/// opcodes mark iteration boundaries for the one-shot breakpoint flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugOpcode {
    /// Entering a function, state or label scope.
    EnterFrame,
    /// Re-entering state code after a latent call returned.
    EnterLatentResume,
    /// Entering a label inside the current scope.
    EnterLabel,
    /// Entering state scope via a scripted state transition.
    EnterState,
    /// Leaving the current scope.
    LeaveFrame,
    /// Leaving state code to start a latent call.
    LeaveLatentCall,
    /// Leaving a state via a manual transition.
    LeaveState,

    Statement,
    Conditional,
    Switch,
    While,
    Assert,
    Return,
    ReturnNothing,
    ForInit,
    ForEval,
    ForInc,
}

impl DebugOpcode {
    /// Display label shown in the UI location line.
    pub fn label(self) -> &'static str {
        match self {
            DebugOpcode::EnterFrame => "ENTERFRAME",
            DebugOpcode::EnterLatentResume => "LATENTRESUME",
            DebugOpcode::EnterLabel => "LABEL",
            DebugOpcode::EnterState => "ENTERSTATE",
            DebugOpcode::LeaveFrame => "LEAVEFRAME",
            DebugOpcode::LeaveLatentCall => "LATENTCALL",
            DebugOpcode::LeaveState => "LEAVESTATE",
            DebugOpcode::Statement => "STATEMENT",
            DebugOpcode::Conditional => "IF",
            DebugOpcode::Switch => "SWITCH",
            DebugOpcode::While => "WHILE",
            DebugOpcode::Assert => "ASSERT",
            DebugOpcode::Return => "RETURN",
            DebugOpcode::ReturnNothing => "RETURNNOTHING",
            DebugOpcode::ForInit => "FORINIT",
            DebugOpcode::ForEval => "FOREVAL",
            DebugOpcode::ForInc => "FORINC",
        }
    }

    /// Whether this opcode begins a new loop iteration, re-arming the
    /// frame's one-shot breakpoint flag.
    pub fn starts_loop_iteration(self) -> bool {
        matches!(self, DebugOpcode::ForInc | DebugOpcode::While)
    }
}

/// One debug notification from the VM's instrumentation hook.
#[derive(Debug, Clone, Copy)]
pub struct DebugEvent {
    pub frame: FrameHandle,
    pub object: ObjRef,
    pub opcode: DebugOpcode,
    pub line: i32,
    pub pos: i32,
}

impl DebugEvent {
    pub fn new(frame: FrameHandle, object: ObjRef, opcode: DebugOpcode, line: i32, pos: i32) -> Self {
        Self {
            frame,
            object,
            opcode,
            line,
            pos,
        }
    }
}
