//! A finished raster-pipeline program and its lowering to stages.
//!
//! The temporary stacks are laid out back to back after the value slots.
//! Each stack gets room for the deepest point it reaches anywhere in the
//! instruction list, so every push and pop resolves to a fixed slot index
//! at lowering time.

use super::builder::{stack_usage, unpack_nybbles, BuilderOp, Instruction};
use super::debug_trace::DebugTrace;
use super::pipeline::{Callbacks, Pipeline, StageList};
use super::stages::{BranchKind, HostStage, SlotSpace, Stage};
use crate::bail_pipeline;
use crate::error::Result;
use log::debug;
use std::fmt::Write as _;

/// Stages emitted between forced `stack_rewind`s.
const STACK_REWIND_INTERVAL: usize = 500;

/// Slot memory for one pipeline instance. Values and temporary stacks hold
/// one `u32` per lane; uniforms and immutables are shared by all lanes.
#[derive(Debug, Clone)]
pub struct SlotData {
    pub values: Vec<u32>,
    pub immutable: Vec<u32>,
    pub uniforms: Vec<u32>,
    pub lane_count: usize,
}

impl SlotData {
    pub fn byte_size(&self) -> usize {
        (self.values.len() + self.immutable.len()) * std::mem::size_of::<f32>()
    }
}

#[derive(Debug)]
pub struct Program {
    instructions: Vec<Instruction>,
    num_value_slots: usize,
    num_uniform_slots: usize,
    num_immutable_slots: usize,
    num_labels: usize,
    /// Deepest point of each temporary stack, indexed by stack id.
    stack_depths: Vec<usize>,
    num_temp_stack_slots: usize,
    debug_trace: Option<DebugTrace>,
}

/// Stages plus the label each branch targets, before handing them to a host.
struct Lowered {
    stages: Vec<Stage>,
    branch_labels: Vec<(usize, usize)>,
    label_positions: Vec<Option<usize>>,
}

fn temp_stack_max_depths(instructions: &[Instruction]) -> Result<Vec<usize>> {
    let mut current: Vec<i64> = Vec::new();
    let mut max: Vec<usize> = Vec::new();
    for (index, inst) in instructions.iter().enumerate() {
        let Ok(id) = usize::try_from(inst.stack_id) else {
            bail_pipeline!("instruction {} uses invalid stack {}", index, inst.stack_id);
        };
        if id >= current.len() {
            current.resize(id + 1, 0);
            max.resize(id + 1, 0);
        }
        current[id] += i64::from(stack_usage(inst));
        if current[id] < 0 {
            bail_pipeline!("stack {} underflows at instruction {} ({:?})", id, index, inst.op);
        }
        max[id] = max[id].max(current[id] as usize);
    }
    if let Some((id, depth)) = current.iter().enumerate().find(|(_, d)| **d != 0) {
        bail_pipeline!("stack {} is unbalanced at end of program (depth {})", id, depth);
    }
    Ok(max)
}

/// `%.7g`-style rendering of a float.
fn format_float(value: f32) -> String {
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }
    let exponent = f64::from(value.abs()).log10().floor() as i32;
    let mut text = if !(-5..7).contains(&exponent) {
        let s = format!("{:.6e}", value);
        match s.split_once('e') {
            Some((mantissa, exp)) => {
                let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
                format!("{}e{}", mantissa, exp)
            }
            None => s,
        }
    } else {
        let decimals = (6 - exponent).max(0) as usize;
        let s = format!("{:.*}", decimals, value);
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    };
    if !text.contains('.') && !text.contains('e') && !text.contains("inf") && !text.contains("NaN") {
        text.push_str(".0");
    }
    text
}

pub fn format_constant(bits: u32) -> String {
    let value = f32::from_bits(bits);
    if value.is_finite() {
        format!("0x{:08X} ({})", bits, format_float(value))
    } else {
        format!("0x{:08X}", bits)
    }
}

fn swizzle_text(components: &[u8]) -> String {
    if components.iter().all(|c| *c < 4) {
        components.iter().map(|c| ['x', 'y', 'z', 'w'][*c as usize]).collect()
    } else {
        let parts: Vec<String> = components.iter().map(|c| c.to_string()).collect();
        format!("({})", parts.join(", "))
    }
}

/// Placeholder child stages for dumps.
struct DumpCallbacks;

impl Callbacks for DumpCallbacks {
    fn append_shader(&mut self, index: usize, pipeline: &mut dyn Pipeline) -> bool {
        pipeline.append(Stage::Host(HostStage::new(format!("invoke_shader {}", index), |_| {})));
        true
    }

    fn append_color_filter(&mut self, index: usize, pipeline: &mut dyn Pipeline) -> bool {
        pipeline.append(Stage::Host(HostStage::new(format!("invoke_color_filter {}", index), |_| {})));
        true
    }

    fn append_blender(&mut self, index: usize, pipeline: &mut dyn Pipeline) -> bool {
        pipeline.append(Stage::Host(HostStage::new(format!("invoke_blender {}", index), |_| {})));
        true
    }

    fn to_linear_srgb(&mut self, pipeline: &mut dyn Pipeline) {
        pipeline.append(Stage::Host(HostStage::new("invoke_to_linear_srgb", |_| {})));
    }

    fn from_linear_srgb(&mut self, pipeline: &mut dyn Pipeline) {
        pipeline.append(Stage::Host(HostStage::new("invoke_from_linear_srgb", |_| {})));
    }
}

impl Program {
    pub(crate) fn new(
        instructions: Vec<Instruction>,
        num_value_slots: usize,
        num_uniform_slots: usize,
        num_immutable_slots: usize,
        num_labels: usize,
        debug_trace: Option<DebugTrace>,
    ) -> Result<Program> {
        let stack_depths = temp_stack_max_depths(&instructions)?;
        let num_temp_stack_slots = stack_depths.iter().sum();
        debug!(
            "finished program: {} instructions, {} value slots, {} uniform slots, {} immutable slots, stacks {:?}",
            instructions.len(),
            num_value_slots,
            num_uniform_slots,
            num_immutable_slots,
            stack_depths
        );
        Ok(Program {
            instructions,
            num_value_slots,
            num_uniform_slots,
            num_immutable_slots,
            num_labels,
            stack_depths,
            num_temp_stack_slots,
            debug_trace,
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn num_value_slots(&self) -> usize {
        self.num_value_slots
    }

    pub fn num_uniform_slots(&self) -> usize {
        self.num_uniform_slots
    }

    pub fn num_immutable_slots(&self) -> usize {
        self.num_immutable_slots
    }

    pub fn num_temp_stack_slots(&self) -> usize {
        self.num_temp_stack_slots
    }

    pub fn stack_depths(&self) -> &[usize] {
        &self.stack_depths
    }

    pub fn debug_trace(&self) -> Option<&DebugTrace> {
        self.debug_trace.as_ref()
    }

    pub fn allocate_slot_data(&self, lane_count: usize) -> SlotData {
        SlotData {
            values: vec![0; (self.num_value_slots + self.num_temp_stack_slots) * lane_count],
            immutable: vec![0; self.num_immutable_slots],
            uniforms: vec![0; self.num_uniform_slots],
            lane_count,
        }
    }

    fn stack_base(&self, stack: usize) -> usize {
        self.num_value_slots + self.stack_depths[..stack].iter().sum::<usize>()
    }

    /// Lowers the program onto `pipeline`. Immutable values and `uniforms`
    /// are written into `slots`. Nothing is appended unless lowering succeeds.
    pub fn append_stages(
        &self,
        pipeline: &mut dyn Pipeline,
        slots: &mut SlotData,
        callbacks: Option<&mut dyn Callbacks>,
        uniforms: &[f32],
    ) -> Result<()> {
        if uniforms.len() < self.num_uniform_slots {
            debug!(
                "{} uniform values supplied for {} slots; the rest are zero",
                uniforms.len(),
                self.num_uniform_slots
            );
        }
        slots.uniforms = (0..self.num_uniform_slots)
            .map(|i| uniforms.get(i).map(|u| u.to_bits()).unwrap_or(0))
            .collect();
        let lowered = self.lower(slots, callbacks, pipeline.supports_tail_calls())?;
        for stage in lowered.stages {
            pipeline.append(stage);
        }
        Ok(())
    }

    fn lower(&self, slots: &mut SlotData, mut callbacks: Option<&mut dyn Callbacks>, tail_calls: bool) -> Result<Lowered> {
        let mut list = StageList::default();
        let mut label_positions: Vec<Option<usize>> = vec![None; self.num_labels];
        let mut branch_labels: Vec<(usize, usize)> = Vec::new();
        let mut depth = vec![0usize; self.stack_depths.len()];
        let mut last_rewind = 0usize;
        if slots.immutable.len() < self.num_immutable_slots {
            slots.immutable.resize(self.num_immutable_slots, 0);
        }

        for inst in &self.instructions {
            let stack = inst.stack_id as usize;
            let top = self.stack_base(stack) + depth[stack];
            let top_of = |id: i32, depth: &[usize]| -> usize {
                let id = id as usize;
                self.stack_base(id) + depth.get(id).copied().unwrap_or(0)
            };
            let a = inst.imm_a as usize;
            let slot_a = inst.slot_a.unwrap_or(0);
            let slot_b = inst.slot_b.unwrap_or(0);

            if !tail_calls && list.len() - last_rewind >= STACK_REWIND_INTERVAL {
                list.append(Stage::StackRewind);
                last_rewind = list.len();
            }

            let stage = match inst.op {
                BuilderOp::PushConstant => Some(Stage::SplatConstant {
                    dst: top,
                    count: a,
                    value: inst.imm_b as u32,
                }),
                BuilderOp::PushSlots => Some(Stage::CopySlots {
                    dst: top,
                    src: slot_a,
                    count: a,
                    masked: false,
                }),
                BuilderOp::PushUniform => Some(Stage::CopyUniform {
                    dst: top,
                    src: slot_a,
                    count: a,
                }),
                BuilderOp::PushImmutable => Some(Stage::CopyImmutable {
                    dst: top,
                    src: slot_a,
                    count: a,
                }),
                BuilderOp::PushSlotsIndirect | BuilderOp::PushUniformIndirect | BuilderOp::PushImmutableIndirect => {
                    let space = match inst.op {
                        BuilderOp::PushSlotsIndirect => SlotSpace::Value,
                        BuilderOp::PushUniformIndirect => SlotSpace::Uniform,
                        _ => SlotSpace::Immutable,
                    };
                    Some(Stage::CopyFromIndirect {
                        dst: top,
                        src: slot_a,
                        count: a,
                        offset: top_of(inst.imm_b, &depth) - 1,
                        limit: slot_b,
                        space,
                    })
                }
                BuilderOp::PushClone => Some(Stage::CopySlots {
                    dst: top,
                    src: top - inst.imm_b as usize,
                    count: a,
                    masked: false,
                }),
                BuilderOp::PushCloneFromStack => Some(Stage::CopySlots {
                    dst: top,
                    src: top_of(inst.imm_b, &depth) - inst.imm_c as usize,
                    count: a,
                    masked: false,
                }),
                BuilderOp::PushCloneIndirectFromStack => {
                    let other_top = top_of(inst.imm_b, &depth);
                    Some(Stage::CopyFromIndirect {
                        dst: top,
                        src: other_top - inst.imm_c as usize,
                        count: a,
                        offset: top_of(inst.imm_d, &depth) - 1,
                        limit: other_top,
                        space: SlotSpace::Value,
                    })
                }
                BuilderOp::PushConditionMask => Some(Stage::StoreConditionMask { dst: top }),
                BuilderOp::PushLoopMask => Some(Stage::StoreLoopMask { dst: top }),
                BuilderOp::PushReturnMask => Some(Stage::StoreReturnMask { dst: top }),
                BuilderOp::PushSrcRgba => Some(Stage::StoreSrc { dst: top }),
                BuilderOp::PushDstRgba => Some(Stage::StoreDst { dst: top }),
                BuilderOp::PushDeviceXY01 => Some(Stage::StoreDeviceXY01 { dst: top }),
                BuilderOp::PadStack | BuilderOp::DiscardStack => None,
                BuilderOp::PopConditionMask => Some(Stage::LoadConditionMask { src: top - 1 }),
                BuilderOp::PopLoopMask => Some(Stage::LoadLoopMask { src: top - 1 }),
                BuilderOp::PopReturnMask => Some(Stage::LoadReturnMask { src: top - 1 }),
                BuilderOp::PopAndReenableLoopMask => Some(Stage::ReenableLoopMask { src: top - 1 }),
                BuilderOp::PopSrcRg => Some(Stage::LoadSrcRg { src: top - 2 }),
                BuilderOp::PopSrcRgba => Some(Stage::LoadSrc { src: top - 4 }),
                BuilderOp::PopDstRgba => Some(Stage::LoadDst { src: top - 4 }),
                BuilderOp::CopyStackToSlots | BuilderOp::CopyStackToSlotsUnmasked => Some(Stage::CopySlots {
                    dst: slot_a,
                    src: top - inst.imm_b as usize,
                    count: a,
                    masked: inst.op == BuilderOp::CopyStackToSlots,
                }),
                BuilderOp::CopyStackToSlotsIndirect => Some(Stage::CopyToIndirectMasked {
                    dst: slot_a,
                    src: top - inst.imm_c as usize,
                    count: a,
                    offset: top_of(inst.imm_b, &depth) - 1,
                    limit: slot_b,
                }),
                BuilderOp::SwizzleCopyStackToSlots => Some(Stage::SwizzleCopySlotsMasked {
                    dst: slot_a,
                    src: top - inst.imm_c as usize,
                    components: unpack_nybbles(inst.imm_b, a),
                }),
                BuilderOp::SwizzleCopyStackToSlotsIndirect => Some(Stage::SwizzleCopyToIndirectMasked {
                    dst: slot_a,
                    src: top - inst.imm_c as usize,
                    components: unpack_nybbles(inst.imm_b, a),
                    offset: top_of(inst.imm_d, &depth) - 1,
                    limit: slot_b,
                }),
                BuilderOp::CopySlotsMasked | BuilderOp::CopySlotsUnmasked => Some(Stage::CopySlots {
                    dst: slot_a,
                    src: slot_b,
                    count: a,
                    masked: inst.op == BuilderOp::CopySlotsMasked,
                }),
                BuilderOp::ZeroSlotsUnmasked => Some(Stage::ZeroSlots { dst: slot_a, count: a }),
                BuilderOp::StoreImmutableValue => {
                    match slots.immutable.get_mut(slot_a) {
                        Some(slot) => *slot = inst.imm_a as u32,
                        None => bail_pipeline!("immutable slot {} is out of range", slot_a),
                    }
                    None
                }
                BuilderOp::InitLaneMasks => Some(Stage::InitLaneMasks),
                BuilderOp::MergeConditionMask => Some(Stage::MergeConditionMask { src: top - 2 }),
                BuilderOp::MergeInvConditionMask => Some(Stage::MergeInvConditionMask { src: top - 2 }),
                BuilderOp::MergeLoopMask => Some(Stage::MergeLoopMask { src: top - 1 }),
                BuilderOp::ReenableLoopMask => Some(Stage::ReenableLoopMask { src: top - 1 }),
                BuilderOp::MaskOffLoopMask => Some(Stage::MaskOffLoopMask),
                BuilderOp::MaskOffReturnMask => Some(Stage::MaskOffReturnMask),
                BuilderOp::ContinueOp => Some(Stage::ContinueOp {
                    continue_mask: top_of(inst.imm_a, &depth) - 1,
                }),
                BuilderOp::CaseOp => Some(Stage::CaseOp {
                    base: top - 2,
                    value: inst.imm_a,
                }),
                BuilderOp::StoreSrcRg => Some(Stage::StoreSrcRg { dst: slot_a }),
                BuilderOp::StoreSrc => Some(Stage::StoreSrc { dst: slot_a }),
                BuilderOp::StoreDst => Some(Stage::StoreDst { dst: slot_a }),
                BuilderOp::StoreDeviceXY01 => Some(Stage::StoreDeviceXY01 { dst: slot_a }),
                BuilderOp::LoadSrc => Some(Stage::LoadSrc { src: slot_a }),
                BuilderOp::LoadDst => Some(Stage::LoadDst { src: slot_a }),
                BuilderOp::Unary(op, ty) => Some(Stage::Unary {
                    op,
                    ty,
                    dst: inst.slot_a.unwrap_or(top - a),
                    count: a,
                }),
                BuilderOp::Binary(op, ty) => Some(Stage::Binary {
                    op,
                    ty,
                    dst: top - 2 * a,
                    src: top - a,
                    count: a,
                }),
                BuilderOp::BinaryImm(op, ty) => Some(Stage::BinaryImm {
                    op,
                    ty,
                    dst: inst.slot_a.unwrap_or(top - a),
                    count: a,
                    imm: inst.imm_b as u32,
                }),
                BuilderOp::Ternary(op, ty) => Some(Stage::Ternary {
                    op,
                    ty,
                    base: top - 3 * a,
                    count: a,
                }),
                BuilderOp::Select => Some(Stage::Select {
                    dst: top - 2 * a,
                    src: top - a,
                    count: a,
                }),
                BuilderOp::Swizzle => Some(Stage::Swizzle {
                    base: top - a,
                    consumed: a,
                    components: unpack_nybbles(inst.imm_b, inst.imm_c as usize),
                }),
                BuilderOp::Shuffle => {
                    let produced = inst.imm_b as usize;
                    let mut components = unpack_nybbles(inst.imm_c, produced.min(8));
                    if produced > 8 {
                        components.extend(unpack_nybbles(inst.imm_d, produced - 8));
                    }
                    Some(Stage::Swizzle {
                        base: top - a,
                        consumed: a,
                        components,
                    })
                }
                BuilderOp::Transpose => Some(Stage::Transpose {
                    base: top - a * inst.imm_b as usize,
                    columns: a,
                    rows: inst.imm_b as usize,
                }),
                BuilderOp::DiagonalMatrix => Some(Stage::DiagonalMatrix {
                    base: top - 1,
                    columns: a,
                    rows: inst.imm_b as usize,
                }),
                BuilderOp::MatrixResize => Some(Stage::MatrixResize {
                    base: top - a * inst.imm_b as usize,
                    from: (a, inst.imm_b as usize),
                    to: (inst.imm_c as usize, inst.imm_d as usize),
                }),
                BuilderOp::MatrixMultiply => {
                    let left = (a, inst.imm_b as usize);
                    let right = (inst.imm_c as usize, inst.imm_d as usize);
                    Some(Stage::MatrixMultiply {
                        base: top - (left.0 * left.1 + right.0 * right.1),
                        left,
                        right,
                    })
                }
                BuilderOp::Inverse => Some(Stage::Inverse {
                    base: top - a * a,
                    size: a,
                }),
                BuilderOp::Determinant => Some(Stage::Determinant {
                    base: top - a * a,
                    size: a,
                }),
                BuilderOp::Dot => Some(Stage::Dot {
                    base: top - 2 * a,
                    count: a,
                }),
                BuilderOp::Refract4 => Some(Stage::Refract4 { base: top - 9 }),
                BuilderOp::Label => {
                    match label_positions.get_mut(a) {
                        Some(position) => *position = Some(list.len()),
                        None => bail_pipeline!("label {} was never allocated", a),
                    }
                    None
                }
                BuilderOp::Jump
                | BuilderOp::BranchIfAllLanesActive
                | BuilderOp::BranchIfAnyLanesActive
                | BuilderOp::BranchIfNoLanesActive
                | BuilderOp::BranchIfNoActiveLanesOnStackTopEqual => {
                    let kind = match inst.op {
                        BuilderOp::Jump => BranchKind::Jump,
                        BuilderOp::BranchIfAllLanesActive => BranchKind::IfAllLanesActive,
                        BuilderOp::BranchIfAnyLanesActive => BranchKind::IfAnyLanesActive,
                        BuilderOp::BranchIfNoLanesActive => BranchKind::IfNoLanesActive,
                        _ => BranchKind::IfNoActiveLanesEqual {
                            slot: top - 1,
                            value: inst.imm_b,
                        },
                    };
                    let backward = label_positions.get(a).copied().flatten().is_some();
                    if backward && !tail_calls {
                        list.append(Stage::StackRewind);
                        last_rewind = list.len();
                    }
                    // Patched to a relative offset once every label is known.
                    let own = list.len();
                    branch_labels.push((own, a));
                    Some(Stage::Branch {
                        kind,
                        offset: own as i32,
                    })
                }
                BuilderOp::InvokeShader | BuilderOp::InvokeColorFilter | BuilderOp::InvokeBlender => {
                    let Some(cb) = callbacks.as_deref_mut() else {
                        bail_pipeline!("{:?} requires host callbacks", inst.op);
                    };
                    let ok = match inst.op {
                        BuilderOp::InvokeShader => cb.append_shader(a, &mut list),
                        BuilderOp::InvokeColorFilter => cb.append_color_filter(a, &mut list),
                        _ => cb.append_blender(a, &mut list),
                    };
                    if !ok {
                        bail_pipeline!("host rejected child {} for {:?}", a, inst.op);
                    }
                    Some(Stage::SetBasePointer)
                }
                BuilderOp::InvokeToLinearSrgb | BuilderOp::InvokeFromLinearSrgb => {
                    let Some(cb) = callbacks.as_deref_mut() else {
                        bail_pipeline!("{:?} requires host callbacks", inst.op);
                    };
                    if inst.op == BuilderOp::InvokeToLinearSrgb {
                        cb.to_linear_srgb(&mut list);
                    } else {
                        cb.from_linear_srgb(&mut list);
                    }
                    Some(Stage::SetBasePointer)
                }
                BuilderOp::TraceLine => Some(Stage::TraceLine { line: inst.imm_a }),
                BuilderOp::TraceVar => Some(Stage::TraceVar { slot: slot_a, count: a }),
                BuilderOp::TraceEnter => Some(Stage::TraceEnter { function: inst.imm_a }),
                BuilderOp::TraceExit => Some(Stage::TraceExit { function: inst.imm_a }),
                BuilderOp::TraceScope => Some(Stage::TraceScope { delta: inst.imm_a }),
            };
            if let Some(stage) = stage {
                list.append(stage);
            }
            depth[stack] = (depth[stack] as i64 + i64::from(stack_usage(inst))) as usize;
        }

        let mut stages = list.stages;
        for &(index, label) in &branch_labels {
            let Some(target) = label_positions.get(label).copied().flatten() else {
                bail_pipeline!("branch to label {} which was never placed", label);
            };
            if let Stage::Branch { offset, .. } = &mut stages[index] {
                *offset = target as i32 - *offset;
            }
        }
        Ok(Lowered {
            stages,
            branch_labels,
            label_positions,
        })
    }

    fn value_range(&self, start: usize, count: usize) -> String {
        if start >= self.num_value_slots {
            let index = start - self.num_value_slots;
            return match count {
                1 => format!("${}", index),
                _ => format!("${}..{}", index, index + count - 1),
            };
        }
        if let Some(trace) = &self.debug_trace {
            if let Some(first) = trace.slot_name(start) {
                return match count {
                    1 => first,
                    _ => format!(
                        "{}..{}",
                        first,
                        trace
                            .slot_name(start + count - 1)
                            .unwrap_or_else(|| format!("v{}", start + count - 1))
                    ),
                };
            }
        }
        match count {
            1 => format!("v{}", start),
            _ => format!("v{}..{}", start, start + count - 1),
        }
    }

    fn other_range(prefix: &str, start: usize, count: usize) -> String {
        match count {
            1 => format!("{}{}", prefix, start),
            _ => format!("{}{}..{}", prefix, start, start + count - 1),
        }
    }

    fn stage_arguments(&self, stage: &Stage) -> String {
        let v = |start: usize, count: usize| self.value_range(start, count);
        match stage {
            Stage::StoreSrcRg { dst } => format!("{} = src.rg", v(*dst, 2)),
            Stage::StoreSrc { dst } => format!("{} = src.rgba", v(*dst, 4)),
            Stage::StoreDst { dst } => format!("{} = dst.rgba", v(*dst, 4)),
            Stage::StoreDeviceXY01 { dst } => format!("{} = DeviceCoords.xy01", v(*dst, 4)),
            Stage::LoadSrc { src } => format!("src.rgba = {}", v(*src, 4)),
            Stage::LoadSrcRg { src } => format!("src.rg = {}", v(*src, 2)),
            Stage::LoadDst { src } => format!("dst.rgba = {}", v(*src, 4)),
            Stage::StoreConditionMask { dst } => format!("{} = CondMask", v(*dst, 1)),
            Stage::LoadConditionMask { src } => format!("CondMask = {}", v(*src, 1)),
            Stage::MergeConditionMask { src } => format!("CondMask = {} & {}", v(*src, 1), v(*src + 1, 1)),
            Stage::MergeInvConditionMask { src } => format!("CondMask = {} & ~{}", v(*src, 1), v(*src + 1, 1)),
            Stage::StoreLoopMask { dst } => format!("{} = LoopMask", v(*dst, 1)),
            Stage::LoadLoopMask { src } => format!("LoopMask = {}", v(*src, 1)),
            Stage::MergeLoopMask { src } => format!("LoopMask &= {}", v(*src, 1)),
            Stage::ReenableLoopMask { src } => format!("LoopMask |= {}", v(*src, 1)),
            Stage::StoreReturnMask { dst } => format!("{} = RetMask", v(*dst, 1)),
            Stage::LoadReturnMask { src } => format!("RetMask = {}", v(*src, 1)),
            Stage::ContinueOp { continue_mask } => format!("{} |= ExecMask", v(*continue_mask, 1)),
            Stage::CaseOp { base, value } => format!("{} == {}, default {}", v(*base, 1), value, v(*base + 1, 1)),
            Stage::SplatConstant { dst, count, value } => format!("{} = {}", v(*dst, *count), format_constant(*value)),
            Stage::ZeroSlots { dst, count } => format!("{} = 0", v(*dst, *count)),
            Stage::CopySlots { dst, src, count, .. } => format!("{} = {}", v(*dst, *count), v(*src, *count)),
            Stage::CopyUniform { dst, src, count } => {
                format!("{} = {}", v(*dst, *count), Self::other_range("u", *src, *count))
            }
            Stage::CopyImmutable { dst, src, count } => {
                format!("{} = {}", v(*dst, *count), Self::other_range("i", *src, *count))
            }
            Stage::CopyFromIndirect {
                dst,
                src,
                count,
                offset,
                space,
                ..
            } => {
                let source = match space {
                    SlotSpace::Value => v(*src, *count),
                    SlotSpace::Uniform => Self::other_range("u", *src, *count),
                    SlotSpace::Immutable => Self::other_range("i", *src, *count),
                };
                format!("{} = Indirect({} + {})", v(*dst, *count), source, v(*offset, 1))
            }
            Stage::CopyToIndirectMasked {
                dst, src, count, offset, ..
            } => format!("Indirect({} + {}) = {}", v(*dst, *count), v(*offset, 1), v(*src, *count)),
            Stage::SwizzleCopySlotsMasked { dst, src, components } => format!(
                "{}.{} = {}",
                v(*dst, 1),
                swizzle_text(components),
                v(*src, components.len())
            ),
            Stage::SwizzleCopyToIndirectMasked {
                dst,
                src,
                components,
                offset,
                ..
            } => format!(
                "Indirect({} + {}).{} = {}",
                v(*dst, 1),
                v(*offset, 1),
                swizzle_text(components),
                v(*src, components.len())
            ),
            Stage::Swizzle {
                base,
                consumed,
                components,
            } => format!(
                "{} = ({}).{}",
                v(*base, components.len()),
                v(*base, *consumed),
                swizzle_text(components)
            ),
            Stage::Transpose { base, columns, rows } => v(*base, columns * rows),
            Stage::DiagonalMatrix { base, columns, rows } => format!("{} = diag({})", v(*base, columns * rows), v(*base, 1)),
            Stage::MatrixResize { base, to, .. } => v(*base, to.0 * to.1),
            Stage::MatrixMultiply { base, left, right } => {
                format!("{} = {} * {}", v(*base, right.0 * left.1), v(*base, left.0 * left.1), v(*base + left.0 * left.1, right.0 * right.1))
            }
            Stage::Inverse { base, size } | Stage::Determinant { base, size } => v(*base, size * size),
            Stage::Dot { base, count } => format!("{} = dot({}, {})", v(*base, 1), v(*base, *count), v(*base + count, *count)),
            Stage::Refract4 { base } => v(*base, 9),
            Stage::Unary { dst, count, .. } => v(*dst, *count),
            Stage::Binary { dst, src, count, .. } => format!("{}, {}", v(*dst, *count), v(*src, *count)),
            Stage::BinaryImm { dst, count, imm, .. } => format!("{}, {}", v(*dst, *count), format_constant(*imm)),
            Stage::Ternary { base, count, .. } => format!(
                "{}, {}, {}",
                v(*base, *count),
                v(*base + count, *count),
                v(*base + 2 * count, *count)
            ),
            Stage::Select { dst, src, count } => format!("{} = Mask({})", v(*dst, *count), v(*src, *count)),
            Stage::Branch {
                kind: BranchKind::IfNoActiveLanesEqual { slot, value },
                offset,
            } => format!("{:+} if no lanes of {} == 0x{:08X}", offset, v(*slot, 1), *value as u32),
            Stage::Branch { offset, .. } => format!("{:+}", offset),
            Stage::TraceLine { line } => format!("line {}", line),
            Stage::TraceVar { slot, count } => v(*slot, *count),
            Stage::TraceEnter { function } | Stage::TraceExit { function } => format!("function {}", function),
            Stage::TraceScope { delta } => format!("{:+}", delta),
            Stage::InitLaneMasks
            | Stage::MaskOffLoopMask
            | Stage::MaskOffReturnMask
            | Stage::StackRewind
            | Stage::SetBasePointer
            | Stage::Host(_) => String::new(),
        }
    }

    /// Human-readable listing of the lowered stages, one per line.
    pub fn dump(&self) -> String {
        let mut slots = self.allocate_slot_data(1);
        let mut callbacks = DumpCallbacks;
        let lowered = match self.lower(&mut slots, Some(&mut callbacks), false) {
            Ok(lowered) => lowered,
            Err(e) => return format!("<unable to lower program: {}>\n", e),
        };
        let labels: std::collections::HashMap<usize, usize> = lowered.branch_labels.iter().copied().collect();
        let mut out = String::new();
        for (index, stage) in lowered.stages.iter().enumerate() {
            let mut name = stage.name();
            name.truncate(30);
            let mut arguments = self.stage_arguments(stage);
            if let (Stage::Branch { offset, .. }, Some(label)) = (stage, labels.get(&index)) {
                let target = index as i64 + i64::from(*offset);
                let _ = write!(arguments, " (label {} at #{})", label, target + 1);
            }
            let line = format!("{:5}. {:<30} {}", index + 1, name, arguments);
            let _ = writeln!(out, "{}", line.trim_end());
        }
        debug_assert!(lowered.label_positions.len() == self.num_labels);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rp::builder::{BinaryOp, Builder, NumType, SlotRange};

    #[test]
    fn test_format_constant() {
        assert_eq!(format_constant(0x3F80_0000), "0x3F800000 (1.0)");
        assert_eq!(format_constant(0.5f32.to_bits()), "0x3F000000 (0.5)");
        assert_eq!(format_constant(0), "0x00000000 (0.0)");
        assert_eq!(format_constant(f32::INFINITY.to_bits()), "0x7F800000");
        assert_eq!(format_constant(1e-10f32.to_bits()), format!("0x{:08X} (1e-10)", 1e-10f32.to_bits()));
    }

    #[test]
    fn test_unbalanced_stack_is_an_error() {
        let mut b = Builder::new();
        b.push_literal_f(1.0);
        assert!(matches!(
            b.finish(0, 0, 0, None),
            Err(crate::CompilerError::PipelineError(_))
        ));
    }

    #[test]
    fn test_stack_depths_and_layout() {
        let mut b = Builder::new();
        b.push_zeros(3);
        b.set_current_stack(1);
        b.push_literal_f(1.0);
        b.discard_stack(1);
        b.set_current_stack(0);
        b.pop_slots_unmasked(SlotRange::new(0, 3));
        let program = b.finish(3, 0, 0, None).unwrap();
        // The push/discard pair on stack 1 cancels out entirely.
        assert_eq!(program.stack_depths(), &[3]);
        assert_eq!(program.num_temp_stack_slots(), 3);
        let slots = program.allocate_slot_data(4);
        assert_eq!(slots.values.len(), 6 * 4);
    }

    #[test]
    fn test_dump_format() {
        let mut b = Builder::new();
        b.init_lane_masks();
        b.push_slots(SlotRange::new(0, 1));
        b.push_literal_f(1.0);
        b.binary_op(BinaryOp::Add, NumType::Float, 1);
        b.pop_slots_unmasked(SlotRange::new(1, 1));
        let program = b.finish(2, 0, 0, None).unwrap();
        let dump = program.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "    1. init_lane_masks");
        assert_eq!(lines[1], format!("    2. {:<30} $0 = v0", "copy_1_slots_unmasked"));
        assert!(lines[2].contains("add_imm_float"), "{}", dump);
        assert!(lines[2].ends_with("$0, 0x3F800000 (1.0)"), "{}", dump);
        assert!(lines[3].ends_with("v1 = $0"), "{}", dump);
    }

    #[test]
    fn test_branches_resolve_to_labels() {
        let mut b = Builder::new();
        let top = b.next_label_id();
        let exit = b.next_label_id();
        b.label(top);
        b.init_lane_masks();
        b.branch_if_no_lanes_active(exit);
        b.init_lane_masks();
        b.jump(top);
        b.label(exit);
        b.init_lane_masks();
        let program = b.finish(0, 0, 0, None).unwrap();
        let dump = program.dump();
        assert!(dump.contains("branch_if_no_lanes_active"), "{}", dump);
        assert!(dump.contains("(label 1 at #"), "{}", dump);
        assert!(dump.contains("stack_rewind"), "{}", dump);
        let mut slots = program.allocate_slot_data(1);
        let mut list = StageList::default();
        program.append_stages(&mut list, &mut slots, None, &[]).unwrap();
        // init, branch(+3), init, rewind, jump(-4), init
        let offsets: Vec<i32> = list
            .stages
            .iter()
            .filter_map(|s| match s {
                Stage::Branch { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![4, -4]);
    }

    #[test]
    fn test_invoke_without_callbacks_fails() {
        let mut b = Builder::new();
        b.invoke_shader(0);
        let program = b.finish(0, 0, 0, None).unwrap();
        let mut slots = program.allocate_slot_data(1);
        let mut list = StageList::default();
        assert!(program.append_stages(&mut list, &mut slots, None, &[]).is_err());
        assert!(list.stages.is_empty());
    }
}
