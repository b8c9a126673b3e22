//! Slot names and trace events recorded alongside a program when
//! `Settings::debug_trace` is on.

use crate::error::Result;
use crate::ir::NumberKind;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotNumberKind {
    Float,
    Signed,
    Unsigned,
    Boolean,
}

impl From<NumberKind> for SlotNumberKind {
    fn from(kind: NumberKind) -> Self {
        match kind {
            NumberKind::Signed => SlotNumberKind::Signed,
            NumberKind::Unsigned => SlotNumberKind::Unsigned,
            NumberKind::Boolean => SlotNumberKind::Boolean,
            NumberKind::Float | NumberKind::Nonnumeric => SlotNumberKind::Float,
        }
    }
}

/// Describes one scalar slot of a traced variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDebugInfo {
    pub name: String,
    pub columns: usize,
    pub rows: usize,
    /// Position of this slot within its variable's shape.
    pub component_index: usize,
    /// Position of this slot within the whole variable.
    pub group_index: usize,
    pub number_kind: SlotNumberKind,
    pub line: usize,
    /// Index of the function whose return value this slot holds.
    pub fn_return_value: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDebugInfo {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceOp {
    Line,
    Var,
    Enter,
    Exit,
    Scope,
}

/// One recorded event. `Line` carries a line number, `Var` a slot and its
/// bits, `Enter`/`Exit` a function index and `Scope` a depth change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub op: TraceOp,
    pub data: [i32; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugTrace {
    pub slot_info: Vec<SlotDebugInfo>,
    pub uniform_info: Vec<SlotDebugInfo>,
    pub func_info: Vec<FunctionDebugInfo>,
    pub trace_info: Vec<TraceInfo>,
}

impl DebugTrace {
    /// Name of a value slot, with its component suffix for multi-slot values.
    pub fn slot_name(&self, slot: usize) -> Option<String> {
        describe(self.slot_info.get(slot)?)
    }

    pub fn uniform_name(&self, slot: usize) -> Option<String> {
        describe(self.uniform_info.get(slot)?)
    }

    pub fn write_trace(&self, out: impl Write) -> Result<()> {
        serde_json::to_writer_pretty(out, self)?;
        Ok(())
    }

    pub fn read_trace(input: impl Read) -> Result<DebugTrace> {
        Ok(serde_json::from_reader(input)?)
    }
}

fn describe(info: &SlotDebugInfo) -> Option<String> {
    if info.name.is_empty() {
        return None;
    }
    if info.columns * info.rows <= 1 {
        return Some(info.name.clone());
    }
    if info.rows > 1 {
        let column = info.component_index / info.rows;
        let row = info.component_index % info.rows;
        return Some(format!("{}[{}][{}]", info.name, column, row));
    }
    Some(format!("{}[{}]", info.name, info.component_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str, columns: usize, rows: usize, component_index: usize) -> SlotDebugInfo {
        SlotDebugInfo {
            name: name.to_string(),
            columns,
            rows,
            component_index,
            group_index: component_index,
            number_kind: SlotNumberKind::Float,
            line: 1,
            fn_return_value: None,
        }
    }

    #[test]
    fn test_slot_names() {
        let trace = DebugTrace {
            slot_info: vec![slot("x", 1, 1, 0), slot("v", 2, 1, 1), slot("m", 2, 2, 3)],
            ..Default::default()
        };
        assert_eq!(trace.slot_name(0).as_deref(), Some("x"));
        assert_eq!(trace.slot_name(1).as_deref(), Some("v[1]"));
        assert_eq!(trace.slot_name(2).as_deref(), Some("m[1][1]"));
        assert_eq!(trace.slot_name(3), None);
    }

    #[test]
    fn test_json_round_trip() {
        let trace = DebugTrace {
            slot_info: vec![slot("p", 2, 1, 0)],
            func_info: vec![FunctionDebugInfo {
                name: "half4 main(float2 p)".to_string(),
            }],
            trace_info: vec![TraceInfo {
                op: TraceOp::Line,
                data: [3, 0],
            }],
            ..Default::default()
        };
        let mut bytes = Vec::new();
        trace.write_trace(&mut bytes).unwrap();
        let read = DebugTrace::read_trace(bytes.as_slice()).unwrap();
        assert_eq!(read, trace);
    }
}
