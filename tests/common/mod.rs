//! Shared fixtures: a small script VM image and a recording front-end.

#![allow(dead_code)]

use std::collections::VecDeque;

use script_debugger::reflect::{
    ClassDef, ClassId, FrameData, FrameHandle, FrameKind, FunId, FunctionDef, ObjRef, PropertyDef,
    PropertyKind, ScriptObject, StructDef, StructId, Value, Vm,
};
use script_debugger::{
    DebugEvent, DebugOpcode, DebuggerEngine, EngineOptions, RecursionLimits, RowId, UserAction,
    WatchChannel,
};

/// Front-end double: records every outward call and feeds scripted user
/// actions to the suspension pump.
#[derive(Debug, Default)]
pub struct RecordingUi {
    pub actions: VecDeque<UserAction>,
    /// (class, package, line, opcode, object) per update_location call.
    pub locations: Vec<(String, String, i32, String, String)>,
    pub call_stacks: Vec<Vec<String>>,
    /// Live pane content, cleared by clear_watch: (id, parent, name, value).
    pub panes: [Vec<(RowId, Option<RowId>, String, String)>; 3],
    pub log: Vec<String>,
    pub shows: usize,
    /// Line of the most recent update_location at each show().
    pub suspend_lines: Vec<i32>,
    pub hides: usize,
    pub closes: usize,
    pub capture_releases: usize,
    next_row: u32,
}

fn pane_index(channel: WatchChannel) -> usize {
    match channel {
        WatchChannel::Local => 0,
        WatchChannel::Global => 1,
        WatchChannel::User => 2,
    }
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actions(actions: &[UserAction]) -> Self {
        Self {
            actions: actions.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn pane(&self, channel: WatchChannel) -> &[(RowId, Option<RowId>, String, String)] {
        &self.panes[pane_index(channel)]
    }

    pub fn pane_names(&self, channel: WatchChannel) -> Vec<&str> {
        self.pane(channel).iter().map(|(_, _, n, _)| n.as_str()).collect()
    }

    pub fn find_row(
        &self,
        channel: WatchChannel,
        name: &str,
    ) -> Option<&(RowId, Option<RowId>, String, String)> {
        self.pane(channel).iter().find(|(_, _, n, _)| n == name)
    }
}

impl script_debugger::DebuggerUi for RecordingUi {
    fn update_location(&mut self, class: &str, package: &str, line: i32, opcode: &str, object: &str) {
        self.locations.push((
            class.to_string(),
            package.to_string(),
            line,
            opcode.to_string(),
            object.to_string(),
        ));
    }

    fn update_call_stack(&mut self, frames: &[String]) {
        self.call_stacks.push(frames.to_vec());
    }

    fn lock_watch(&mut self, _channel: WatchChannel) {}

    fn unlock_watch(&mut self, _channel: WatchChannel) {}

    fn clear_watch(&mut self, channel: WatchChannel) {
        self.panes[pane_index(channel)].clear();
    }

    fn add_watch_row(
        &mut self,
        channel: WatchChannel,
        parent: Option<RowId>,
        name: &str,
        value: &str,
    ) -> RowId {
        self.next_row += 1;
        let id = RowId(self.next_row);
        self.panes[pane_index(channel)].push((id, parent, name.to_string(), value.to_string()));
        id
    }

    fn add_to_log(&mut self, line: &str) {
        self.log.push(line.to_string());
    }

    fn show(&mut self) {
        self.shows += 1;
        self.suspend_lines
            .push(self.locations.last().map_or(0, |l| l.2));
    }

    fn hide(&mut self) {
        self.hides += 1;
    }

    fn close(&mut self) {
        self.closes += 1;
    }

    fn release_input_capture(&mut self) {
        self.capture_releases += 1;
    }

    fn poll_action(&mut self) -> Option<UserAction> {
        Some(
            self.actions
                .pop_front()
                .expect("suspension pump polled with no scripted action left"),
        )
    }
}

/// A small script image: three classes with inheritance, a struct, two
/// live objects referencing each other, and two functions.
pub struct Fixture {
    pub vm: Vm,
    pub object_class: ClassId,
    pub actor: ClassId,
    pub pawn: ClassId,
    pub vector: StructId,
    pub tick: FunId,
    pub take_damage: FunId,
    pub pawn_obj: ObjRef,
    pub other_obj: ObjRef,
}

pub fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut vm = Vm::new();

    let vector = StructId(0);
    vm.structs.push(StructDef {
        name: "Vector".to_string(),
        fields: vec![
            PropertyDef::new("X", PropertyKind::Float),
            PropertyDef::new("Y", PropertyKind::Float),
            PropertyDef::new("Z", PropertyKind::Float),
        ],
    });

    let object_class = ClassId(0);
    let actor = ClassId(1);
    let pawn = ClassId(2);

    vm.classes.push(ClassDef {
        name: "Object".to_string(),
        package: "Core".to_string(),
        superclass: None,
        props: vec![PropertyDef::new("ObjectFlags", PropertyKind::Int)],
        defaults: vec![Value::Int(0)],
        has_debug_info: true,
    });

    let zero_vector = Value::Struct {
        id: vector,
        fields: vec![Value::Float(0.0), Value::Float(0.0), Value::Float(0.0)],
    };

    vm.classes.push(ClassDef {
        name: "Actor".to_string(),
        package: "Engine".to_string(),
        superclass: Some(object_class),
        props: vec![
            PropertyDef::new("Health", PropertyKind::Int),
            PropertyDef::new("Location", PropertyKind::Struct { id: vector }),
            PropertyDef::new(
                "Tags",
                PropertyKind::DynArray {
                    inner: Box::new(PropertyKind::Name),
                },
            ),
            PropertyDef::new(
                "Slots",
                PropertyKind::StaticArray {
                    inner: Box::new(PropertyKind::Int),
                    dim: 3,
                },
            ),
            PropertyDef::new("Partner", PropertyKind::Object { class: actor }),
        ],
        defaults: vec![
            Value::Int(0),
            Value::Int(100),
            zero_vector.clone(),
            Value::Array(Vec::new()),
            Value::StaticArray(vec![Value::Int(0), Value::Int(0), Value::Int(0)]),
            Value::Object(None),
        ],
        has_debug_info: true,
    });

    vm.classes.push(ClassDef {
        name: "PlayerPawn".to_string(),
        package: "Game".to_string(),
        superclass: Some(actor),
        props: vec![
            PropertyDef::new("Score", PropertyKind::Int),
            PropertyDef::new(
                "Loadout",
                PropertyKind::DynArray {
                    inner: Box::new(PropertyKind::Object { class: actor }),
                },
            ),
        ],
        defaults: vec![
            Value::Int(0),
            Value::Int(100),
            zero_vector.clone(),
            Value::Array(Vec::new()),
            Value::StaticArray(vec![Value::Int(0), Value::Int(0), Value::Int(0)]),
            Value::Object(None),
            Value::Int(0),
            Value::Array(Vec::new()),
        ],
        has_debug_info: true,
    });

    let tick = FunId(0);
    vm.functions.push(FunctionDef {
        name: "Tick".to_string(),
        owner: actor,
        locals: vec![PropertyDef::new("DeltaTime", PropertyKind::Float)],
    });

    let take_damage = FunId(1);
    vm.functions.push(FunctionDef {
        name: "TakeDamage".to_string(),
        owner: pawn,
        locals: vec![
            PropertyDef::new("Amount", PropertyKind::Int),
            PropertyDef::new("InstigatedBy", PropertyKind::Object { class: actor }),
            PropertyDef::new("Health", PropertyKind::Int),
        ],
    });

    let other_obj = vm.heap.alloc(ScriptObject {
        name: "Actor1".to_string(),
        class: actor,
        fields: vec![
            Value::Int(0),
            Value::Int(55),
            zero_vector.clone(),
            Value::Array(Vec::new()),
            Value::StaticArray(vec![Value::Int(0), Value::Int(0), Value::Int(0)]),
            Value::Object(None),
        ],
        pending_kill: false,
    });

    let pawn_obj = vm.heap.alloc(ScriptObject {
        name: "Pawn0".to_string(),
        class: pawn,
        fields: vec![
            Value::Int(0),
            Value::Int(80),
            Value::Struct {
                id: vector,
                fields: vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)],
            },
            Value::Array(vec![
                Value::Name("alpha".to_string()),
                Value::Name("beta".to_string()),
            ]),
            Value::StaticArray(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            Value::Object(Some(other_obj)),
            Value::Int(10),
            Value::Array(vec![Value::Object(Some(other_obj))]),
        ],
        pending_kill: false,
    });

    // Close the reference cycle: Actor1.Partner -> Pawn0.
    if let Some(obj) = vm.heap.get_mut(other_obj) {
        obj.fields[5] = Value::Object(Some(pawn_obj));
    }

    Fixture {
        vm,
        object_class,
        actor,
        pawn,
        vector,
        tick,
        take_damage,
        pawn_obj,
        other_obj,
    }
}

impl Fixture {
    /// Register a function frame with the VM and return its handle.
    pub fn function_frame(&mut self, id: u64, object: ObjRef, fun: FunId, locals: Vec<Value>) -> FrameHandle {
        let handle = FrameHandle(id);
        self.vm.push_frame(FrameData {
            handle,
            kind: FrameKind::Function,
            object,
            function: Some(fun),
            locals,
            latent_action: false,
        });
        handle
    }

    /// Register a state frame with the VM and return its handle.
    pub fn state_frame(&mut self, id: u64, object: ObjRef, latent_action: bool) -> FrameHandle {
        let handle = FrameHandle(id);
        self.vm.push_frame(FrameData {
            handle,
            kind: FrameKind::State,
            object,
            function: None,
            locals: Vec::new(),
            latent_action,
        });
        handle
    }
}

pub fn ev(frame: FrameHandle, object: ObjRef, opcode: DebugOpcode, line: i32) -> DebugEvent {
    DebugEvent::new(frame, object, opcode, line, 0)
}

pub fn engine_with_actions(actions: &[UserAction]) -> DebuggerEngine<RecordingUi> {
    DebuggerEngine::new(
        RecordingUi::with_actions(actions),
        RecursionLimits::default(),
        EngineOptions::default(),
    )
}
