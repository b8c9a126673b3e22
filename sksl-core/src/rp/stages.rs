//! Concrete stages produced by lowering a [`super::Program`].
//!
//! Every slot operand is an absolute index into the value arena (variables
//! followed by the temporary stacks) unless the stage names another space.

use super::builder::{BinaryOp, NumType, TernaryOp, UnaryOp};
use std::fmt;
use std::sync::Arc;

/// Which arena an indirect copy reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotSpace {
    Value,
    Uniform,
    Immutable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Jump,
    IfAllLanesActive,
    IfAnyLanesActive,
    IfNoLanesActive,
    /// Taken unless some active lane holds `value` in `slot`.
    IfNoActiveLanesEqual { slot: usize, value: i32 },
}

/// Per-lane color registers, as seen by host-provided stages.
#[derive(Debug, Clone, Default)]
pub struct ColorRegisters {
    pub src: [Vec<f32>; 4],
    pub dst: [Vec<f32>; 4],
}

/// A stage supplied by the host through [`super::pipeline::Callbacks`].
#[derive(Clone)]
pub struct HostStage {
    pub name: String,
    pub run: Arc<dyn Fn(&mut ColorRegisters) + Send + Sync>,
}

impl HostStage {
    pub fn new(name: impl Into<String>, run: impl Fn(&mut ColorRegisters) + Send + Sync + 'static) -> HostStage {
        HostStage {
            name: name.into(),
            run: Arc::new(run),
        }
    }
}

impl fmt::Debug for HostStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostStage").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    InitLaneMasks,
    StoreSrcRg { dst: usize },
    StoreSrc { dst: usize },
    StoreDst { dst: usize },
    StoreDeviceXY01 { dst: usize },
    LoadSrc { src: usize },
    LoadSrcRg { src: usize },
    LoadDst { src: usize },
    StoreConditionMask { dst: usize },
    LoadConditionMask { src: usize },
    /// Condition mask becomes `slot[src] & slot[src + 1]`.
    MergeConditionMask { src: usize },
    MergeInvConditionMask { src: usize },
    StoreLoopMask { dst: usize },
    LoadLoopMask { src: usize },
    MergeLoopMask { src: usize },
    ReenableLoopMask { src: usize },
    MaskOffLoopMask,
    StoreReturnMask { dst: usize },
    LoadReturnMask { src: usize },
    MaskOffReturnMask,
    ContinueOp { continue_mask: usize },
    /// `base` holds the switch value, `base + 1` the default mask.
    CaseOp { base: usize, value: i32 },
    SplatConstant { dst: usize, count: usize, value: u32 },
    ZeroSlots { dst: usize, count: usize },
    CopySlots { dst: usize, src: usize, count: usize, masked: bool },
    CopyUniform { dst: usize, src: usize, count: usize },
    CopyImmutable { dst: usize, src: usize, count: usize },
    /// Copies from `src + slot[offset]`, clamped so the read ends by `limit`.
    CopyFromIndirect {
        dst: usize,
        src: usize,
        count: usize,
        offset: usize,
        limit: usize,
        space: SlotSpace,
    },
    CopyToIndirectMasked {
        dst: usize,
        src: usize,
        count: usize,
        offset: usize,
        limit: usize,
    },
    SwizzleCopySlotsMasked { dst: usize, src: usize, components: Vec<u8> },
    SwizzleCopyToIndirectMasked {
        dst: usize,
        src: usize,
        components: Vec<u8>,
        offset: usize,
        limit: usize,
    },
    /// Reads `consumed` slots at `base` and writes `components.len()` slots there.
    Swizzle { base: usize, consumed: usize, components: Vec<u8> },
    Transpose { base: usize, columns: usize, rows: usize },
    DiagonalMatrix { base: usize, columns: usize, rows: usize },
    MatrixResize { base: usize, from: (usize, usize), to: (usize, usize) },
    MatrixMultiply { base: usize, left: (usize, usize), right: (usize, usize) },
    Inverse { base: usize, size: usize },
    Determinant { base: usize, size: usize },
    Dot { base: usize, count: usize },
    Refract4 { base: usize },
    Unary { op: UnaryOp, ty: NumType, dst: usize, count: usize },
    Binary { op: BinaryOp, ty: NumType, dst: usize, src: usize, count: usize },
    BinaryImm { op: BinaryOp, ty: NumType, dst: usize, count: usize, imm: u32 },
    /// Operands at `base`, `base + count` and `base + 2 * count`; result at `base`.
    Ternary { op: TernaryOp, ty: NumType, base: usize, count: usize },
    /// `dst = src` in active lanes.
    Select { dst: usize, src: usize, count: usize },
    Branch { kind: BranchKind, offset: i32 },
    StackRewind,
    SetBasePointer,
    Host(HostStage),
    TraceLine { line: i32 },
    TraceVar { slot: usize, count: usize },
    TraceEnter { function: i32 },
    TraceExit { function: i32 },
    TraceScope { delta: i32 },
}

fn counted(base: &str, count: usize, ty: &str) -> String {
    match count {
        1 => format!("{}_{}", base, ty),
        2..=4 => format!("{}_{}_{}s", base, count, ty),
        _ => format!("{}_n_{}s", base, ty),
    }
}

fn counted_slots(base: &str, count: usize, suffix: &str) -> String {
    match count {
        1..=4 => format!("{}_{}_slots{}", base, count, suffix),
        _ => format!("{}_n_slots{}", base, suffix),
    }
}

impl Stage {
    /// The stage name as shown in program dumps.
    pub fn name(&self) -> String {
        match self {
            Stage::InitLaneMasks => "init_lane_masks".into(),
            Stage::StoreSrcRg { .. } => "store_src_rg".into(),
            Stage::StoreSrc { .. } => "store_src".into(),
            Stage::StoreDst { .. } => "store_dst".into(),
            Stage::StoreDeviceXY01 { .. } => "store_device_xy01".into(),
            Stage::LoadSrc { .. } => "load_src".into(),
            Stage::LoadSrcRg { .. } => "load_src_rg".into(),
            Stage::LoadDst { .. } => "load_dst".into(),
            Stage::StoreConditionMask { .. } => "store_condition_mask".into(),
            Stage::LoadConditionMask { .. } => "load_condition_mask".into(),
            Stage::MergeConditionMask { .. } => "merge_condition_mask".into(),
            Stage::MergeInvConditionMask { .. } => "merge_inv_condition_mask".into(),
            Stage::StoreLoopMask { .. } => "store_loop_mask".into(),
            Stage::LoadLoopMask { .. } => "load_loop_mask".into(),
            Stage::MergeLoopMask { .. } => "merge_loop_mask".into(),
            Stage::ReenableLoopMask { .. } => "reenable_loop_mask".into(),
            Stage::MaskOffLoopMask => "mask_off_loop_mask".into(),
            Stage::StoreReturnMask { .. } => "store_return_mask".into(),
            Stage::LoadReturnMask { .. } => "load_return_mask".into(),
            Stage::MaskOffReturnMask => "mask_off_return_mask".into(),
            Stage::ContinueOp { .. } => "continue_op".into(),
            Stage::CaseOp { .. } => "case_op".into(),
            Stage::SplatConstant { count, .. } => match count {
                1 => "copy_constant".into(),
                2..=4 => format!("splat_{}_constants", count),
                _ => "splat_n_constants".into(),
            },
            Stage::ZeroSlots { count, .. } => counted_slots("zero", *count, "_unmasked"),
            Stage::CopySlots { count, masked, .. } => {
                counted_slots("copy", *count, if *masked { "_masked" } else { "_unmasked" })
            }
            Stage::CopyUniform { count, .. } => match count {
                1 => "copy_uniform".into(),
                2..=4 => format!("copy_{}_uniforms", count),
                _ => "copy_n_uniforms".into(),
            },
            Stage::CopyImmutable { count, .. } => match count {
                1 => "copy_immutable_unmasked".into(),
                2..=4 => format!("copy_{}_immutables_unmasked", count),
                _ => "copy_n_immutables_unmasked".into(),
            },
            Stage::CopyFromIndirect { space, .. } => match space {
                SlotSpace::Value => "copy_from_indirect_unmasked".into(),
                SlotSpace::Uniform => "copy_from_indirect_uniform_unmasked".into(),
                SlotSpace::Immutable => "copy_from_indirect_immutable_unmasked".into(),
            },
            Stage::CopyToIndirectMasked { .. } => "copy_to_indirect_masked".into(),
            Stage::SwizzleCopySlotsMasked { components, .. } => {
                counted_slots("swizzle_copy", components.len(), "_masked")
            }
            Stage::SwizzleCopyToIndirectMasked { .. } => "swizzle_copy_to_indirect_masked".into(),
            Stage::Swizzle { consumed, components, .. } => {
                if *consumed <= 4 && components.len() <= 4 {
                    format!("swizzle_{}", components.len())
                } else {
                    "shuffle".into()
                }
            }
            Stage::Transpose { .. } => "transpose".into(),
            Stage::DiagonalMatrix { .. } => "diagonal_matrix".into(),
            Stage::MatrixResize { .. } => "matrix_resize".into(),
            Stage::MatrixMultiply { left, .. } => match left {
                (2, 2) | (3, 3) | (4, 4) => format!("matrix_multiply_{}", left.0),
                _ => "matrix_multiply_n".into(),
            },
            Stage::Inverse { size, .. } => format!("inverse_mat{}", size),
            Stage::Determinant { size, .. } => format!("determinant_mat{}", size),
            Stage::Dot { count, .. } => format!("dot_{}_floats", count),
            Stage::Refract4 { .. } => "refract_4_floats".into(),
            Stage::Unary { op, ty, count, .. } => {
                let base = op.name();
                match op {
                    UnaryOp::CastToFloatFromInt => counted(base, *count, "int"),
                    UnaryOp::CastToFloatFromUint => counted(base, *count, "uint"),
                    UnaryOp::CastToIntFromFloat | UnaryOp::CastToUintFromFloat => counted(base, *count, "float"),
                    UnaryOp::BitwiseNot => counted(base, *count, "int"),
                    _ => counted(base, *count, ty.name()),
                }
            }
            Stage::Binary { op, ty, count, .. } => counted(op.name(), *count, ty.name()),
            Stage::BinaryImm { op, ty, count, .. } => counted(&format!("{}_imm", op.name()), *count, ty.name()),
            Stage::Ternary { op, ty, count, .. } => counted(op.name(), *count, ty.name()),
            Stage::Select { count, .. } => counted_slots("select", *count, "_masked"),
            Stage::Branch { kind, .. } => match kind {
                BranchKind::Jump => "jump".into(),
                BranchKind::IfAllLanesActive => "branch_if_all_lanes_active".into(),
                BranchKind::IfAnyLanesActive => "branch_if_any_lanes_active".into(),
                BranchKind::IfNoLanesActive => "branch_if_no_lanes_active".into(),
                BranchKind::IfNoActiveLanesEqual { .. } => "branch_if_no_active_lanes_eq".into(),
            },
            Stage::StackRewind => "stack_rewind".into(),
            Stage::SetBasePointer => "set_base_pointer".into(),
            Stage::Host(host) => host.name.clone(),
            Stage::TraceLine { .. } => "trace_line".into(),
            Stage::TraceVar { .. } => "trace_var".into(),
            Stage::TraceEnter { .. } => "trace_enter".into(),
            Stage::TraceExit { .. } => "trace_exit".into(),
            Stage::TraceScope { .. } => "trace_scope".into(),
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Stage::Branch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_follow_counts() {
        let add = |count| Stage::Binary {
            op: BinaryOp::Add,
            ty: NumType::Float,
            dst: 0,
            src: 0,
            count,
        };
        assert_eq!(add(1).name(), "add_float");
        assert_eq!(add(3).name(), "add_3_floats");
        assert_eq!(add(9).name(), "add_n_floats");
        let imm = Stage::BinaryImm {
            op: BinaryOp::Mul,
            ty: NumType::Int,
            dst: 0,
            count: 1,
            imm: 2,
        };
        assert_eq!(imm.name(), "mul_imm_int");
        assert_eq!(Stage::SplatConstant { dst: 0, count: 1, value: 0 }.name(), "copy_constant");
        assert_eq!(
            Stage::CopySlots {
                dst: 0,
                src: 4,
                count: 2,
                masked: false
            }
            .name(),
            "copy_2_slots_unmasked"
        );
        assert_eq!(Stage::Select { dst: 0, src: 2, count: 2 }.name(), "select_2_slots_masked");
    }
}
