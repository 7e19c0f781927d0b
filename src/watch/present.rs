//! Projection of resolved values into watch-pane rows.
//!
//! Expansion depth is bounded per value category; each bound is
//! independently configurable, with `-1` meaning unlimited. Counters live
//! on the presenter, which is constructed per refresh call, so recursive
//! refreshes never share state. Object and class expansion additionally
//! tracks the branch being expanded, so reference cycles terminate even
//! with unlimited bounds.

use std::collections::HashMap;

use crate::config::RecursionLimits;
use crate::reflect::{ClassId, ObjRef, PropertyDef, PropertyKind, Value, Vm};
use crate::ui::{DebuggerUi, RowId, WatchChannel};

#[derive(Debug, Default)]
struct Counters {
    object: u32,
    struct_members: u32,
    class: u32,
    static_array: u32,
    dynamic_array: u32,
}

pub struct WatchPresenter<'a> {
    vm: &'a Vm,
    ui: &'a mut dyn DebuggerUi,
    limits: &'a RecursionLimits,
    counters: Counters,
    expanding_objects: Vec<ObjRef>,
    expanding_classes: Vec<ClassId>,
}

impl<'a> WatchPresenter<'a> {
    pub fn new(vm: &'a Vm, ui: &'a mut dyn DebuggerUi, limits: &'a RecursionLimits) -> Self {
        Self {
            vm,
            ui,
            limits,
            counters: Counters::default(),
            expanding_objects: Vec::new(),
            expanding_classes: Vec::new(),
        }
    }

    /// Add one top-level row with an explicit label (user watches keep
    /// their expression text as the row name).
    pub fn present_root(
        &mut self,
        channel: WatchChannel,
        label: &str,
        kind: &PropertyKind,
        value: &Value,
        parent: Option<RowId>,
    ) {
        self.row_with_base(channel, parent, label, label, kind, value);
    }

    /// One row per field of a live object, inherited fields grouped under
    /// `[[ AncestorClass ]]` pseudo-rows. The globals pane shows every
    /// field; expansion of an object reference hides universal-base
    /// members (`skip_base`).
    pub fn present_object_fields(
        &mut self,
        channel: WatchChannel,
        object: ObjRef,
        parent: Option<RowId>,
        skip_base: bool,
    ) {
        let Some(obj) = self.vm.heap.get(object) else {
            return;
        };
        let class = obj.class;
        let chain = self.build_parent_chain(channel, class, parent);

        for (owner, index, def) in self.vm.layout(class) {
            if skip_base && self.vm.is_universal_base(owner) && owner != class {
                continue;
            }
            let Some(value) = obj.fields.get(index) else {
                continue;
            };
            let row_parent = chain.get(&owner).copied().unwrap_or(parent);
            self.named_row(channel, row_parent, &def.name, &def.kind, value);
        }
    }

    /// Flat rows for a function frame's parameters and locals.
    pub fn present_locals(
        &mut self,
        channel: WatchChannel,
        defs: &[PropertyDef],
        values: &[Value],
    ) {
        for (def, value) in defs.iter().zip(values.iter()) {
            self.named_row(channel, None, &def.name, &def.kind, value);
        }
    }

    /// Row labeled in the standard "Name ( Type )" form.
    fn named_row(
        &mut self,
        channel: WatchChannel,
        parent: Option<RowId>,
        name: &str,
        kind: &PropertyKind,
        value: &Value,
    ) {
        let label = match kind {
            PropertyKind::StaticArray { inner, .. } => {
                format!("{name} ( Static {} Array )", self.vm.kind_name(inner))
            }
            _ => format!("{name} ( {} )", self.vm.kind_name(kind)),
        };
        self.row_with_base(channel, parent, &label, name, kind, value);
    }

    /// Emit one row and expand composite values beneath it. `base` is the
    /// bare member name used to label array elements.
    fn row_with_base(
        &mut self,
        channel: WatchChannel,
        parent: Option<RowId>,
        label: &str,
        base: &str,
        kind: &PropertyKind,
        value: &Value,
    ) {
        match (kind, value) {
            (PropertyKind::StaticArray { inner, .. }, Value::StaticArray(items)) => {
                // A bounded-out static array contributes no row at all.
                if !self.limits.static_array.allows(self.counters.static_array) {
                    return;
                }
                let text = self.vm.format_value(value);
                let row = self.ui.add_watch_row(channel, parent, label, &text);

                self.counters.static_array += 1;
                for (i, item) in items.iter().enumerate() {
                    let element = format!("{base}[{i}]");
                    self.row_with_base(channel, Some(row), &element, base, inner, item);
                }
                self.counters.static_array -= 1;
            }

            (PropertyKind::DynArray { inner }, Value::Array(items)) => {
                let text = self.vm.format_value(value);
                let row = self.ui.add_watch_row(channel, parent, label, &text);

                if self.limits.dynamic_array.allows(self.counters.dynamic_array) {
                    self.counters.dynamic_array += 1;
                    for (i, item) in items.iter().enumerate() {
                        let element = format!("{base}[{i}]");
                        self.row_with_base(channel, Some(row), &element, base, inner, item);
                    }
                    self.counters.dynamic_array -= 1;
                }
            }

            (PropertyKind::Struct { id }, Value::Struct { fields, .. }) => {
                let text = self.vm.format_value(value);
                let row = self.ui.add_watch_row(channel, parent, label, &text);

                if self.limits.struct_members.allows(self.counters.struct_members) {
                    self.counters.struct_members += 1;
                    let defs = &self.vm.struct_def(*id).fields;
                    for (def, field) in defs.iter().zip(fields.iter()) {
                        self.named_row(channel, Some(row), &def.name, &def.kind, field);
                    }
                    self.counters.struct_members -= 1;
                }
            }

            (PropertyKind::Object { .. }, Value::Object(target)) => {
                let text = self.vm.format_value(value);
                let row = self.ui.add_watch_row(channel, parent, label, &text);

                let Some(target) = *target else { return };
                if !self.vm.heap.is_live(target) {
                    // Destroyed sentinel already rendered; stop the branch.
                    return;
                }
                if self.expanding_objects.contains(&target) {
                    return;
                }
                if !self.limits.object.allows(self.counters.object) {
                    return;
                }

                self.counters.object += 1;
                self.expanding_objects.push(target);
                self.present_object_fields(channel, target, Some(row), true);
                self.expanding_objects.pop();
                self.counters.object -= 1;
            }

            (PropertyKind::Class { .. }, Value::Class(target)) => {
                let text = self.vm.format_value(value);
                let row = self.ui.add_watch_row(channel, parent, label, &text);

                let Some(class) = *target else { return };
                if self.expanding_classes.contains(&class) {
                    return;
                }
                if !self.limits.class.allows(self.counters.class) {
                    return;
                }

                self.counters.class += 1;
                self.expanding_classes.push(class);
                let chain = self.build_parent_chain(channel, class, Some(row));
                let defaults = &self.vm.class(class).defaults;
                for (owner, index, def) in self.vm.layout(class) {
                    if self.vm.is_universal_base(owner) && owner != class {
                        continue;
                    }
                    let Some(default) = defaults.get(index) else {
                        continue;
                    };
                    let row_parent = chain.get(&owner).copied().unwrap_or(Some(row));
                    self.named_row(channel, row_parent, &def.name, &def.kind, default);
                }
                self.expanding_classes.pop();
                self.counters.class -= 1;
            }

            _ => {
                let text = self.vm.format_value(value);
                self.ui.add_watch_row(channel, parent, label, &text);
            }
        }
    }

    /// Nested `[[ AncestorClass ]]` pseudo-rows for every base class of
    /// `class`, mapping each class to the parent row its members hang
    /// from. Rebuilt per call; never cached across refreshes.
    fn build_parent_chain(
        &mut self,
        channel: WatchChannel,
        class: ClassId,
        parent: Option<RowId>,
    ) -> HashMap<ClassId, Option<RowId>> {
        let mut chain = HashMap::new();
        chain.insert(class, parent);

        let mut current = parent;
        for ancestor in self.vm.ancestry(class).into_iter().skip(1) {
            let name = format!("[[ {} ]]", self.vm.class(ancestor).name);
            let row = self
                .ui
                .add_watch_row(channel, current, &name, "[[ Base Class ]]");
            chain.insert(ancestor, Some(row));
            current = Some(row);
        }
        chain
    }
}
