//! Reflection surface of the scripting VM.
//!
//! The engine never owns script memory; it reads class metadata, object
//! fields and frame locals through this module. Object references carry a
//! slot + serial pair so liveness can be checked by identity without ever
//! dereferencing a dead slot.

use std::collections::HashMap;

/// Metadata handle for a script class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub usize);

/// Metadata handle for a script struct type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub usize);

/// Metadata handle for a script function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunId(pub usize);

/// Opaque identity of a live VM frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

/// Identity of a heap object: slot index plus the slot's serial at
/// allocation time. A stale serial means the object was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub slot: u32,
    pub serial: u32,
}

/// Declared type of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Int,
    Float,
    Bool,
    Str,
    Name,
    Object { class: ClassId },
    Class { meta: ClassId },
    Struct { id: StructId },
    StaticArray { inner: Box<PropertyKind>, dim: usize },
    DynArray { inner: Box<PropertyKind> },
}

/// A named member of a class, struct or function scope.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDef {
    pub fn new(name: &str, kind: PropertyKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub package: String,
    pub superclass: Option<ClassId>,
    /// Properties introduced by this class (not inherited ones).
    pub props: Vec<PropertyDef>,
    /// Default values, flattened over the full inherited layout.
    pub defaults: Vec<Value>,
    /// Whether the class was compiled with debug metadata.
    pub has_debug_info: bool,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<PropertyDef>,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub owner: ClassId,
    /// Parameters and locals, in declaration order.
    pub locals: Vec<PropertyDef>,
}

/// A runtime script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Name(String),
    Object(Option<ObjRef>),
    Class(Option<ClassId>),
    Struct { id: StructId, fields: Vec<Value> },
    StaticArray(Vec<Value>),
    Array(Vec<Value>),
}

impl Value {
    /// Stable byte image of the value, used for data-watch comparison.
    /// Comparison is byte identity only; no type-aware semantics.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(v) => {
                out.push(0);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float(v) => {
                out.push(1);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Bool(v) => {
                out.push(2);
                out.push(u8::from(*v));
            }
            Value::Str(s) => {
                out.push(3);
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            Value::Name(s) => {
                out.push(4);
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            Value::Object(r) => {
                out.push(5);
                let (slot, serial) = r.map_or((u32::MAX, u32::MAX), |r| (r.slot, r.serial));
                out.extend_from_slice(&slot.to_le_bytes());
                out.extend_from_slice(&serial.to_le_bytes());
            }
            Value::Class(c) => {
                out.push(6);
                let id = c.map_or(usize::MAX, |c| c.0);
                out.extend_from_slice(&id.to_le_bytes());
            }
            Value::Struct { fields, .. } => {
                out.push(7);
                for field in fields {
                    field.encode(out);
                }
            }
            Value::StaticArray(items) | Value::Array(items) => {
                out.push(8);
                out.extend_from_slice(&items.len().to_le_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// A live script object.
#[derive(Debug, Clone)]
pub struct ScriptObject {
    pub name: String,
    pub class: ClassId,
    /// Field values, flattened over the inherited layout (root class first).
    pub fields: Vec<Value>,
    /// Owner flagged for destruction; state code no longer runs for it.
    pub pending_kill: bool,
}

#[derive(Debug, Default)]
struct Slot {
    serial: u32,
    object: Option<ScriptObject>,
}

/// Slotted object storage with serial-checked identity.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, object: ScriptObject) -> ObjRef {
        if let Some(slot) = self.slots.iter().position(|s| s.object.is_none()) {
            self.slots[slot].serial += 1;
            self.slots[slot].object = Some(object);
            return ObjRef {
                slot: slot as u32,
                serial: self.slots[slot].serial,
            };
        }
        self.slots.push(Slot {
            serial: 1,
            object: Some(object),
        });
        ObjRef {
            slot: (self.slots.len() - 1) as u32,
            serial: 1,
        }
    }

    pub fn destroy(&mut self, r: ObjRef) {
        if let Some(slot) = self.slots.get_mut(r.slot as usize) {
            if slot.serial == r.serial {
                slot.object = None;
            }
        }
    }

    /// Identity + slot check, never a dereference.
    pub fn is_live(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.slot as usize)
            .is_some_and(|s| s.serial == r.serial && s.object.is_some())
    }

    pub fn get(&self, r: ObjRef) -> Option<&ScriptObject> {
        let slot = self.slots.get(r.slot as usize)?;
        if slot.serial != r.serial {
            return None;
        }
        slot.object.as_ref()
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut ScriptObject> {
        let slot = self.slots.get_mut(r.slot as usize)?;
        if slot.serial != r.serial {
            return None;
        }
        slot.object.as_mut()
    }
}

/// Kind of scope a VM frame executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Function,
    State,
    Label,
}

/// One live VM invocation context.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub handle: FrameHandle,
    pub kind: FrameKind,
    pub object: ObjRef,
    /// Executing function; `None` for state and label scopes.
    pub function: Option<FunId>,
    pub locals: Vec<Value>,
    /// A latent action is in flight on this (state) frame.
    pub latent_action: bool,
}

/// A field located by name somewhere in a class hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct FieldSlot<'vm> {
    pub owner: ClassId,
    /// Index into the flattened field layout.
    pub index: usize,
    pub def: &'vm PropertyDef,
}

/// The VM image the engine reflects over.
#[derive(Debug, Default)]
pub struct Vm {
    pub classes: Vec<ClassDef>,
    pub structs: Vec<StructDef>,
    pub functions: Vec<FunctionDef>,
    pub heap: Heap,
    frames: HashMap<FrameHandle, FrameData>,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.0]
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.0]
    }

    pub fn function(&self, id: FunId) -> &FunctionDef {
        &self.functions[id.0]
    }

    /// "Package.Class", the form breakpoints are keyed by.
    pub fn class_path(&self, id: ClassId) -> String {
        let class = self.class(id);
        format!("{}.{}", class.package, class.name)
    }

    pub fn frame(&self, handle: FrameHandle) -> Option<&FrameData> {
        self.frames.get(&handle)
    }

    pub fn frame_mut(&mut self, handle: FrameHandle) -> Option<&mut FrameData> {
        self.frames.get_mut(&handle)
    }

    pub fn push_frame(&mut self, frame: FrameData) {
        self.frames.insert(frame.handle, frame);
    }

    pub fn remove_frame(&mut self, handle: FrameHandle) {
        self.frames.remove(&handle);
    }

    /// Class owning the code a frame executes: the function's owner for
    /// function frames, the object's class for state and label scopes.
    pub fn frame_owner_class(&self, frame: &FrameData) -> Option<ClassId> {
        match frame.function {
            Some(fun) => Some(self.function(fun).owner),
            None => self.heap.get(frame.object).map(|o| o.class),
        }
    }

    /// Superclass chain starting at `id` and walking towards the root.
    pub fn ancestry(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.class(current).superclass {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// The hierarchy root, whose members are hidden from watch expansion.
    pub fn is_universal_base(&self, id: ClassId) -> bool {
        self.class(id).superclass.is_none()
    }

    /// Full field layout of a class: root class first, declaration order
    /// within each class. Index positions match `ScriptObject::fields`
    /// and `ClassDef::defaults`.
    pub fn layout(&self, id: ClassId) -> Vec<(ClassId, usize, &PropertyDef)> {
        let mut chain = self.ancestry(id);
        chain.reverse();

        let mut out = Vec::new();
        let mut index = 0;
        for class in chain {
            for def in &self.class(class).props {
                out.push((class, index, def));
                index += 1;
            }
        }
        out
    }

    /// Search a class hierarchy for a field by name, most-derived first.
    pub fn find_field(&self, id: ClassId, name: &str) -> Option<FieldSlot<'_>> {
        let layout = self.layout(id);
        for owner in self.ancestry(id) {
            if let Some(&(class, index, def)) = layout
                .iter()
                .find(|(class, _, def)| *class == owner && def.name == name)
            {
                return Some(FieldSlot {
                    owner: class,
                    index,
                    def,
                });
            }
        }
        None
    }

    /// Search a struct for a member by name.
    pub fn find_struct_field(&self, id: StructId, name: &str) -> Option<(usize, &PropertyDef)> {
        self.struct_def(id)
            .fields
            .iter()
            .enumerate()
            .find(|(_, def)| def.name == name)
    }

    /// Search a function's parameter/local scope for a name.
    pub fn find_local(&self, id: FunId, name: &str) -> Option<(usize, &PropertyDef)> {
        self.function(id)
            .locals
            .iter()
            .enumerate()
            .find(|(_, def)| def.name == name)
    }

    /// Short type label used in watch row names, e.g. "Int" or "Vector".
    pub fn kind_name(&self, kind: &PropertyKind) -> String {
        match kind {
            PropertyKind::Int => "Int".to_string(),
            PropertyKind::Float => "Float".to_string(),
            PropertyKind::Bool => "Bool".to_string(),
            PropertyKind::Str => "Str".to_string(),
            PropertyKind::Name => "Name".to_string(),
            PropertyKind::Object { class } => self.class(*class).name.clone(),
            PropertyKind::Class { .. } => "Class".to_string(),
            PropertyKind::Struct { id } => self.struct_def(*id).name.clone(),
            PropertyKind::StaticArray { inner, .. } | PropertyKind::DynArray { inner } => {
                self.kind_name(inner)
            }
        }
    }

    /// Scalar display text for a value. Composite values get their
    /// summary form; expansion into child rows is the presenter's job.
    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{v:.4}"),
            Value::Bool(v) => if *v { "True" } else { "False" }.to_string(),
            Value::Str(s) => format!("\"{s}\""),
            Value::Name(s) => format!("'{s}'"),
            Value::Object(None) => "None".to_string(),
            Value::Object(Some(r)) => {
                if !self.heap.is_live(*r) {
                    "** Destroyed **".to_string()
                } else {
                    self.heap.get(*r).map_or_else(String::new, |o| o.name.clone())
                }
            }
            Value::Class(None) => "None".to_string(),
            Value::Class(Some(c)) => self.class(*c).name.clone(),
            Value::Struct { id, .. } => self.struct_def(*id).name.clone(),
            Value::StaticArray(items) | Value::Array(items) => {
                let n = items.len();
                format!("{n} {}", if n == 1 { "Element" } else { "Elements" })
            }
        }
    }
}
