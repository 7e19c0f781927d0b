//! Watch expression evaluation.
//!
//! User-entered expressions are parsed once into a node chain and
//! re-resolved against live VM memory on every suspend. Resolution never
//! produces partial results: the first failing link yields a descriptive
//! error that replaces the row's value.

mod parse;
pub mod present;

use crate::error::WatchError;
use crate::reflect::{ClassId, FunId, ObjRef, PropertyKind, StructId, Value, Vm};

/// One member access in a parsed chain.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchNode {
    pub name: String,
    pub index: Option<Box<ArrayIndexNode>>,
    pub next: Option<Box<WatchNode>>,
}

/// An index suffix. Plain numbers resolve literally; anything else is a
/// full sub-expression resolved against the same base scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayIndexNode {
    pub text: String,
    pub literal: Option<i64>,
    pub chain: Option<WatchNode>,
}

impl ArrayIndexNode {
    fn new(text: String) -> Self {
        let trimmed = text.trim();
        let literal = trimmed.parse::<i64>().ok();
        let chain = if literal.is_none() {
            parse_chain(trimmed)
        } else {
            None
        };
        Self {
            text: trimmed.to_string(),
            literal,
            chain,
        }
    }

    fn resolve(&self, scope: &WatchScope<'_>) -> Result<i64, WatchError> {
        if let Some(value) = self.literal {
            return Ok(value);
        }
        let Some(chain) = &self.chain else {
            return Err(WatchError::BadIndexExpression {
                text: self.text.clone(),
            });
        };
        let resolved = resolve_chain(chain, scope)?;
        match resolved.value {
            Value::Int(v) => Ok(*v),
            _ => Err(WatchError::BadIndexExpression {
                text: self.text.clone(),
            }),
        }
    }
}

fn parse_chain(text: &str) -> Option<WatchNode> {
    let segments = parse::split_top_level(text);
    let mut node: Option<WatchNode> = None;
    for segment in segments.into_iter().rev() {
        let (name, index) = parse::split_index_suffix(&segment);
        node = Some(WatchNode {
            name,
            index: index.map(|text| Box::new(ArrayIndexNode::new(text))),
            next: node.map(Box::new),
        });
    }
    node
}

/// A user watch: original text plus the parsed chain.
#[derive(Debug, Clone)]
pub struct WatchExpression {
    pub text: String,
    root: Option<WatchNode>,
}

impl WatchExpression {
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
            root: parse_chain(text),
        }
    }

    pub fn root(&self) -> Option<&WatchNode> {
        self.root.as_ref()
    }

    /// Resolve the whole chain against the given frame scope.
    pub fn resolve<'vm>(&self, scope: &WatchScope<'vm>) -> Result<Resolved<'vm>, WatchError> {
        let Some(root) = &self.root else {
            return Err(WatchError::MemberNotFound {
                name: self.text.clone(),
                scope: scope.scope_name(),
            });
        };
        resolve_chain(root, scope)
    }
}

/// Evaluation context: the active frame's object, class, function and
/// local storage.
#[derive(Clone, Copy)]
pub struct WatchScope<'vm> {
    pub vm: &'vm Vm,
    pub object: ObjRef,
    pub class: ClassId,
    pub function: Option<FunId>,
    pub locals: &'vm [Value],
}

impl<'vm> WatchScope<'vm> {
    fn scope_name(&self) -> String {
        self.vm.class(self.class).name.clone()
    }
}

/// Outcome of a successful resolution: the leaf value and enough type
/// information to drive presentation.
#[derive(Debug)]
pub struct Resolved<'vm> {
    pub name: String,
    pub kind: PropertyKind,
    pub value: &'vm Value,
}

/// Where the next chain node's name is looked up.
enum Cursor<'vm> {
    Object(ObjRef),
    ClassDefaults(ClassId),
    Struct(StructId, &'vm [Value]),
}

impl<'vm> Cursor<'vm> {
    fn name(&self, vm: &Vm) -> String {
        match self {
            Cursor::Object(r) => vm
                .heap
                .get(*r)
                .map_or_else(|| "<destroyed>".to_string(), |o| vm.class(o.class).name.clone()),
            Cursor::ClassDefaults(c) => vm.class(*c).name.clone(),
            Cursor::Struct(id, _) => vm.struct_def(*id).name.clone(),
        }
    }
}

fn resolve_chain<'vm>(
    root: &WatchNode,
    scope: &WatchScope<'vm>,
) -> Result<Resolved<'vm>, WatchError> {
    resolve_node(root, Cursor::Object(scope.object), true, scope)
}

fn resolve_node<'vm>(
    node: &WatchNode,
    cursor: Cursor<'vm>,
    is_base: bool,
    scope: &WatchScope<'vm>,
) -> Result<Resolved<'vm>, WatchError> {
    let vm = scope.vm;

    // Base pass: the first node may bind to a function local before the
    // object's own fields are searched.
    let mut found: Option<(&'vm PropertyKind, &'vm Value)> = None;
    if is_base {
        if let Some(fun) = scope.function {
            if let Some((index, def)) = vm.find_local(fun, &node.name) {
                if let Some(value) = scope.locals.get(index) {
                    found = Some((&def.kind, value));
                }
            }
        }
    }

    if found.is_none() {
        found = match &cursor {
            Cursor::Object(r) => {
                if !vm.heap.is_live(*r) {
                    return Err(WatchError::Destroyed {
                        name: node.name.clone(),
                    });
                }
                let object = vm.heap.get(*r).ok_or_else(|| WatchError::Destroyed {
                    name: node.name.clone(),
                })?;
                vm.find_field(object.class, &node.name)
                    .and_then(|slot| object.fields.get(slot.index).map(|v| (&slot.def.kind, v)))
            }
            Cursor::ClassDefaults(class) => vm.find_field(*class, &node.name).and_then(|slot| {
                vm.class(*class)
                    .defaults
                    .get(slot.index)
                    .map(|v| (&slot.def.kind, v))
            }),
            Cursor::Struct(id, fields) => vm
                .find_struct_field(*id, &node.name)
                .and_then(|(index, def)| fields.get(index).map(|v| (&def.kind, v))),
        };
    }

    let Some((kind, value)) = found else {
        return Err(WatchError::MemberNotFound {
            name: node.name.clone(),
            scope: cursor.name(vm),
        });
    };

    // Effective index: literal, resolved sub-expression, or none for the
    // whole collection.
    let index = match &node.index {
        Some(index_node) => Some(index_node.resolve(scope)?),
        None => None,
    };

    let (kind, value): (PropertyKind, &'vm Value) = match index {
        None => (kind.clone(), value),
        Some(i) => {
            let items = match value {
                Value::StaticArray(items) | Value::Array(items) => items,
                _ => {
                    return Err(WatchError::NotIndexable {
                        name: node.name.clone(),
                    })
                }
            };
            let len = items.len();
            let element = usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .ok_or(WatchError::IndexOutOfBounds {
                    name: node.name.clone(),
                    index: i,
                    len,
                })?;
            let inner = match kind {
                PropertyKind::StaticArray { inner, .. } | PropertyKind::DynArray { inner } => {
                    (**inner).clone()
                }
                other => other.clone(),
            };
            (inner, element)
        }
    };

    let Some(next) = &node.next else {
        return Ok(Resolved {
            name: node.name.clone(),
            kind,
            value,
        });
    };

    // Chain pass: further traversal requires a composite value.
    let next_cursor = match value {
        Value::Object(Some(r)) => Cursor::Object(*r),
        Value::Object(None) | Value::Class(None) => {
            return Err(WatchError::NullTraversal {
                name: node.name.clone(),
            })
        }
        Value::Class(Some(c)) => Cursor::ClassDefaults(*c),
        Value::Struct { id, fields } => Cursor::Struct(*id, fields),
        _ => {
            return Err(WatchError::NotComposite {
                name: node.name.clone(),
            })
        }
    };

    resolve_node(next, next_cursor, false, scope)
}

/// A data watch: one field by name, snapshotted as raw bytes. No chain
/// support; comparison is byte identity only.
#[derive(Debug, Clone)]
pub struct DataWatch {
    pub text: String,
    name: String,
    index: Option<i64>,
    snapshot: Option<Vec<u8>>,
}

impl DataWatch {
    pub fn new(text: &str) -> Self {
        let (name, index) = parse::split_index_suffix(text.trim());
        let index = index.and_then(|t| t.trim().parse::<i64>().ok());
        Self {
            text: text.to_string(),
            name,
            index,
            snapshot: None,
        }
    }

    fn current_bytes(&self, scope: &WatchScope<'_>) -> Option<Vec<u8>> {
        let node = WatchNode {
            name: self.name.clone(),
            index: self
                .index
                .map(|i| Box::new(ArrayIndexNode::new(i.to_string()))),
            next: None,
        };
        resolve_chain(&node, scope).ok().map(|r| r.value.raw_bytes())
    }

    /// Compare the field's bytes against the stored snapshot, reseeding
    /// the snapshot afterwards. The first evaluation seeds and reports
    /// no change; an unresolvable field reports no change.
    pub fn modified(&mut self, scope: &WatchScope<'_>) -> bool {
        let Some(bytes) = self.current_bytes(scope) else {
            return false;
        };
        let changed = match &self.snapshot {
            Some(old) => *old != bytes,
            None => false,
        };
        self.snapshot = Some(bytes);
        changed
    }

    /// Drop the stored snapshot so the next evaluation reseeds.
    pub fn reset(&mut self) {
        self.snapshot = None;
    }
}
