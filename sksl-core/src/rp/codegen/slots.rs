//! Slot allocation for variables, uniforms and deduplicated immutable data.

use crate::ir::{NumberKind, Type, TypeKind, Variable};
use crate::rp::builder::{Builder, SlotRange};
use crate::rp::debug_trace::SlotDebugInfo;
use std::collections::HashMap;

/// Hands out consecutive slots, one range per variable. When tracing, every
/// slot also gets a [`SlotDebugInfo`] naming it.
pub(super) struct SlotManager {
    next: usize,
    ranges: HashMap<u32, SlotRange>,
    aliases: HashMap<u32, SlotRange>,
    debug: Option<Vec<SlotDebugInfo>>,
}

impl SlotManager {
    pub fn new(trace: bool) -> SlotManager {
        SlotManager {
            next: 0,
            ranges: HashMap::new(),
            aliases: HashMap::new(),
            debug: trace.then(Vec::new),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.next
    }

    pub fn get(&self, variable: &Variable) -> Option<SlotRange> {
        self.aliases
            .get(&variable.id)
            .or_else(|| self.ranges.get(&variable.id))
            .copied()
    }

    pub fn get_or_allocate(&mut self, variable: &Variable, line: usize) -> SlotRange {
        if let Some(range) = self.get(variable) {
            return range;
        }
        let range = self.allocate(&variable.name, &variable.ty, line, None);
        self.ranges.insert(variable.id, range);
        range
    }

    /// Slots not tied to any variable: function results and scratch values.
    pub fn allocate(&mut self, name: &str, ty: &Type, line: usize, fn_return_value: Option<usize>) -> SlotRange {
        let range = SlotRange::new(self.next, ty.slot_count());
        self.next += range.count;
        if let Some(debug) = &mut self.debug {
            let start = debug.len();
            describe_slots(name, ty, line, fn_return_value, start, debug);
        }
        range
    }

    /// Points `variable_id` at another variable's slots until
    /// [`SlotManager::restore_alias`] is called with the returned value.
    pub fn alias(&mut self, variable_id: u32, range: SlotRange) -> Option<SlotRange> {
        self.aliases.insert(variable_id, range)
    }

    pub fn restore_alias(&mut self, variable_id: u32, previous: Option<SlotRange>) {
        match previous {
            Some(range) => {
                self.aliases.insert(variable_id, range);
            }
            None => {
                self.aliases.remove(&variable_id);
            }
        }
    }

    pub fn take_debug_info(&mut self) -> Vec<SlotDebugInfo> {
        self.debug.take().unwrap_or_default()
    }
}

fn describe_slots(
    name: &str,
    ty: &Type,
    line: usize,
    fn_return_value: Option<usize>,
    group_start: usize,
    out: &mut Vec<SlotDebugInfo>,
) {
    match &ty.kind {
        TypeKind::Array { element, count } => {
            for i in 0..count.unwrap_or(0) {
                describe_slots(&format!("{}[{}]", name, i), element, line, fn_return_value, group_start, out);
            }
        }
        TypeKind::Struct { fields, .. } => {
            for field in fields {
                let field_name = format!("{}.{}", name, field.name);
                describe_slots(&field_name, &field.ty, line, fn_return_value, group_start, out);
            }
        }
        _ => {
            for component_index in 0..ty.slot_count() {
                let group_index = out.len() - group_start;
                out.push(SlotDebugInfo {
                    name: name.to_string(),
                    columns: ty.columns(),
                    rows: ty.rows(),
                    component_index,
                    group_index,
                    number_kind: ty.number_kind().into(),
                    line,
                    fn_return_value,
                });
            }
        }
    }
}

/// Constant data shared by every lane. Identical runs of values are stored
/// once.
#[derive(Default)]
pub(super) struct ImmutableStore {
    values: Vec<u32>,
}

impl ImmutableStore {
    pub fn slot_count(&self) -> usize {
        self.values.len()
    }

    pub fn bits(&self, slot: usize) -> Option<u32> {
        self.values.get(slot).copied()
    }

    pub fn find_or_store(&mut self, builder: &mut Builder, bits: &[u32]) -> SlotRange {
        if bits.is_empty() {
            return SlotRange::new(0, 0);
        }
        if let Some(index) = self.values.windows(bits.len()).position(|window| window == bits) {
            return SlotRange::new(index, bits.len());
        }
        let start = self.values.len();
        for (offset, &value) in bits.iter().enumerate() {
            builder.store_immutable_value(start + offset, value);
            self.values.push(value);
        }
        SlotRange::new(start, bits.len())
    }
}

/// Number kind of every scalar slot of `ty`, in slot order.
pub(super) fn leaf_kinds(ty: &Type) -> Vec<NumberKind> {
    let mut out = Vec::with_capacity(ty.slot_count());
    collect_leaf_kinds(ty, &mut out);
    out
}

fn collect_leaf_kinds(ty: &Type, out: &mut Vec<NumberKind>) {
    match &ty.kind {
        TypeKind::Array { element, count } => {
            for _ in 0..count.unwrap_or(0) {
                collect_leaf_kinds(element, out);
            }
        }
        TypeKind::Struct { fields, .. } => {
            for field in fields {
                collect_leaf_kinds(&field.ty, out);
            }
        }
        _ => out.extend(std::iter::repeat(ty.number_kind()).take(ty.slot_count())),
    }
}

/// The slot bits of a constant value of the given number kind.
pub(super) fn literal_bits(value: f64, kind: NumberKind) -> u32 {
    match kind {
        NumberKind::Float | NumberKind::Nonnumeric => (value as f32).to_bits(),
        NumberKind::Signed => value as i64 as i32 as u32,
        NumberKind::Unsigned => value as i64 as u32,
        NumberKind::Boolean => {
            if value != 0.0 {
                !0
            } else {
                0
            }
        }
    }
}

pub(super) fn constant_bits(ty: &Type, values: &[f64]) -> Vec<u32> {
    leaf_kinds(ty)
        .into_iter()
        .zip(values)
        .map(|(kind, &value)| literal_bits(value, kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builtin_types;

    #[test]
    fn test_immutable_store_reuses_windows() {
        let mut builder = Builder::new();
        let mut store = ImmutableStore::default();
        let first = store.find_or_store(&mut builder, &[1, 2, 3]);
        let second = store.find_or_store(&mut builder, &[2, 3]);
        let third = store.find_or_store(&mut builder, &[4]);
        assert_eq!(first, SlotRange::new(0, 3));
        assert_eq!(second, SlotRange::new(1, 2));
        assert_eq!(third, SlotRange::new(3, 1));
        assert_eq!(store.slot_count(), 4);
        assert_eq!(builder.instructions().len(), 4);
    }

    #[test]
    fn test_literal_bits() {
        assert_eq!(literal_bits(1.0, NumberKind::Float), 0x3F80_0000);
        assert_eq!(literal_bits(-1.0, NumberKind::Signed), 0xFFFF_FFFF);
        assert_eq!(literal_bits(1.0, NumberKind::Boolean), !0);
        assert_eq!(literal_bits(0.0, NumberKind::Boolean), 0);
    }

    #[test]
    fn test_debug_names_follow_shape() {
        let types = builtin_types();
        let mut slots = SlotManager::new(true);
        slots.allocate("v", &types.float_vecs[0], 3, None);
        slots.allocate("[f].result", &types.float, 4, Some(0));
        let info = slots.take_debug_info();
        assert_eq!(info.len(), 3);
        assert_eq!(info[1].name, "v");
        assert_eq!(info[1].component_index, 1);
        assert_eq!(info[1].group_index, 1);
        assert_eq!(info[2].fn_return_value, Some(0));
    }
}
