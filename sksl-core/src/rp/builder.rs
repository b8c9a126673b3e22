//! Instruction assembler for the raster-pipeline backend.
//!
//! The [`Builder`] exposes an append-only API of stack-machine operations.
//! Each call looks at the instructions already emitted on the same stack and
//! rewrites them in place when a cheaper equivalent exists, so the stream
//! stays small without a separate optimization pass. None of these rewrites
//! aims for a normal form; they catch the shapes code generation actually
//! produces.

use super::debug_trace::DebugTrace;
use super::program::Program;
use crate::error::Result;

/// A run of consecutive slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SlotRange {
    pub index: usize,
    pub count: usize,
}

impl SlotRange {
    pub fn new(index: usize, count: usize) -> SlotRange {
        SlotRange { index, count }
    }

    pub fn end(&self) -> usize {
        self.index + self.count
    }

    /// `count` slots starting `offset` slots into this range.
    pub fn slice(&self, offset: usize, count: usize) -> SlotRange {
        SlotRange::new(self.index + offset, count)
    }
}

/// How an arithmetic op reads its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumType {
    Float,
    Int,
    Uint,
}

impl NumType {
    pub fn name(self) -> &'static str {
        match self {
            NumType::Float => "float",
            NumType::Int => "int",
            NumType::Uint => "uint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Abs,
    Floor,
    Ceil,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqrt,
    Exp,
    Exp2,
    Log,
    Log2,
    Invsqrt,
    BitwiseNot,
    CastToFloatFromInt,
    CastToFloatFromUint,
    CastToIntFromFloat,
    CastToUintFromFloat,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Asin => "asin",
            UnaryOp::Acos => "acos",
            UnaryOp::Atan => "atan",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Exp2 => "exp2",
            UnaryOp::Log => "log",
            UnaryOp::Log2 => "log2",
            UnaryOp::Invsqrt => "invsqrt",
            UnaryOp::BitwiseNot => "bitwise_not",
            UnaryOp::CastToFloatFromInt => "cast_to_float_from",
            UnaryOp::CastToFloatFromUint => "cast_to_float_from",
            UnaryOp::CastToIntFromFloat => "cast_to_int_from",
            UnaryOp::CastToUintFromFloat => "cast_to_uint_from",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    CmpLt,
    CmpLe,
    CmpEq,
    CmpNe,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Atan2,
    Pow,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::CmpLt => "cmplt",
            BinaryOp::CmpLe => "cmple",
            BinaryOp::CmpEq => "cmpeq",
            BinaryOp::CmpNe => "cmpne",
            BinaryOp::BitwiseAnd => "bitwise_and",
            BinaryOp::BitwiseOr => "bitwise_or",
            BinaryOp::BitwiseXor => "bitwise_xor",
            BinaryOp::Atan2 => "atan2",
            BinaryOp::Pow => "pow",
        }
    }

    /// Operand order does not change the result bits.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::CmpEq | BinaryOp::CmpNe | BinaryOp::BitwiseAnd | BinaryOp::BitwiseXor
        )
    }

    /// Ops whose result bits are the same for signed and unsigned operands
    /// run as int ops.
    fn canonical_type(self, ty: NumType) -> NumType {
        match self {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::CmpEq
            | BinaryOp::CmpNe
            | BinaryOp::BitwiseAnd
            | BinaryOp::BitwiseOr
            | BinaryOp::BitwiseXor
                if ty == NumType::Uint =>
            {
                NumType::Int
            }
            _ => ty,
        }
    }

    /// True if an immediate-operand form of this op exists for `ty`.
    fn has_immediate_form(self, ty: NumType) -> bool {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Min | BinaryOp::Max => true,
            BinaryOp::CmpLt | BinaryOp::CmpLe => true,
            BinaryOp::CmpEq | BinaryOp::CmpNe => ty != NumType::Uint,
            BinaryOp::BitwiseAnd | BinaryOp::BitwiseXor => ty == NumType::Int,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TernaryOp {
    /// Float: linear blend. Int: bitwise select by a mask operand.
    Mix,
    Smoothstep,
}

impl TernaryOp {
    pub fn name(self) -> &'static str {
        match self {
            TernaryOp::Mix => "mix",
            TernaryOp::Smoothstep => "smoothstep",
        }
    }
}

/// Builder instruction opcodes. Operands live in the fields of
/// [`Instruction`]; the comment on each op names the ones it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderOp {
    // imm_a: count, imm_b: bit pattern
    PushConstant,
    // slot_a/imm_a: source range
    PushSlots,
    PushUniform,
    PushImmutable,
    // slot_a/imm_a: fixed range, slot_b: limit, imm_b: offset stack
    PushSlotsIndirect,
    PushUniformIndirect,
    PushImmutableIndirect,
    // imm_a: count, imm_b: distance from the stack top to the first cloned slot
    PushClone,
    // imm_a: count, imm_b: other stack, imm_c: distance from its top
    PushCloneFromStack,
    // as above, imm_d: offset stack
    PushCloneIndirectFromStack,
    PushConditionMask,
    PushLoopMask,
    PushReturnMask,
    PushSrcRgba,
    PushDstRgba,
    PushDeviceXY01,
    // imm_a: slots to reclaim without copying
    PadStack,
    PopConditionMask,
    PopLoopMask,
    PopReturnMask,
    PopAndReenableLoopMask,
    PopSrcRg,
    PopSrcRgba,
    PopDstRgba,
    // imm_a: count
    DiscardStack,
    // slot_a/imm_a: destination, imm_b: distance from the stack top
    CopyStackToSlots,
    CopyStackToSlotsUnmasked,
    // slot_a/imm_a: fixed range, slot_b: limit, imm_b: offset stack, imm_c: distance
    CopyStackToSlotsIndirect,
    // slot_a: destination base, imm_a: components, imm_b: packed components, imm_c: distance
    SwizzleCopyStackToSlots,
    // as above, slot_b: limit, imm_d: offset stack
    SwizzleCopyStackToSlotsIndirect,
    // slot_a: destination, slot_b: source, imm_a: count
    CopySlotsMasked,
    CopySlotsUnmasked,
    ZeroSlotsUnmasked,
    // slot_a: immutable slot, imm_a: bit pattern
    StoreImmutableValue,
    InitLaneMasks,
    MergeConditionMask,
    MergeInvConditionMask,
    MergeLoopMask,
    ReenableLoopMask,
    MaskOffLoopMask,
    MaskOffReturnMask,
    // imm_a: continue-mask stack
    ContinueOp,
    // imm_a: case value
    CaseOp,
    // slot_a/imm_a: slots
    StoreSrcRg,
    StoreSrc,
    StoreDst,
    StoreDeviceXY01,
    LoadSrc,
    LoadDst,
    // imm_a: count
    Unary(UnaryOp, NumType),
    Binary(BinaryOp, NumType),
    // imm_a: count, imm_b: constant; slot_a set when operating on slots in place
    BinaryImm(BinaryOp, NumType),
    Ternary(TernaryOp, NumType),
    Select,
    // imm_a: consumed, imm_b: packed components, imm_c: produced
    Swizzle,
    // imm_a: consumed, imm_b: produced, imm_c/imm_d: packed components
    Shuffle,
    // imm_a: columns, imm_b: rows
    Transpose,
    DiagonalMatrix,
    // imm_a/imm_b: source shape, imm_c/imm_d: result shape
    MatrixResize,
    // imm_a/imm_b: left shape, imm_c/imm_d: right shape
    MatrixMultiply,
    // imm_a: matrix size
    Inverse,
    Determinant,
    // imm_a: components
    Dot,
    Refract4,
    // imm_a: label
    Label,
    Jump,
    BranchIfAllLanesActive,
    BranchIfAnyLanesActive,
    BranchIfNoLanesActive,
    // imm_a: label, imm_b: value
    BranchIfNoActiveLanesOnStackTopEqual,
    // imm_a: child index
    InvokeShader,
    InvokeColorFilter,
    InvokeBlender,
    InvokeToLinearSrgb,
    InvokeFromLinearSrgb,
    // imm_a: line
    TraceLine,
    // slot_a/imm_a: traced slots
    TraceVar,
    // imm_a: function index
    TraceEnter,
    TraceExit,
    // imm_a: depth delta
    TraceScope,
}

impl BuilderOp {
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            BuilderOp::Jump
                | BuilderOp::BranchIfAllLanesActive
                | BuilderOp::BranchIfAnyLanesActive
                | BuilderOp::BranchIfNoLanesActive
                | BuilderOp::BranchIfNoActiveLanesOnStackTopEqual
        )
    }

    /// Pushes whose count can be trimmed from the top.
    fn is_trimmable_push(self) -> bool {
        matches!(
            self,
            BuilderOp::PushConstant
                | BuilderOp::PushSlots
                | BuilderOp::PushUniform
                | BuilderOp::PushImmutable
                | BuilderOp::PushClone
                | BuilderOp::PushCloneFromStack
                | BuilderOp::PadStack
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: BuilderOp,
    pub slot_a: Option<usize>,
    pub slot_b: Option<usize>,
    pub imm_a: i32,
    pub imm_b: i32,
    pub imm_c: i32,
    pub imm_d: i32,
    pub stack_id: i32,
}

impl Instruction {
    fn new(op: BuilderOp, stack_id: i32) -> Instruction {
        Instruction {
            op,
            slot_a: None,
            slot_b: None,
            imm_a: 0,
            imm_b: 0,
            imm_c: 0,
            imm_d: 0,
            stack_id,
        }
    }

    fn slots(mut self, a: Option<usize>, b: Option<usize>) -> Instruction {
        self.slot_a = a;
        self.slot_b = b;
        self
    }

    fn imm(mut self, a: i32, b: i32, c: i32, d: i32) -> Instruction {
        self.imm_a = a;
        self.imm_b = b;
        self.imm_c = c;
        self.imm_d = d;
        self
    }
}

/// Net change in stack depth caused by an instruction.
pub fn stack_usage(inst: &Instruction) -> i32 {
    use BuilderOp::*;
    let (a, b, c, d) = (inst.imm_a, inst.imm_b, inst.imm_c, inst.imm_d);
    match inst.op {
        PushConstant | PushSlots | PushUniform | PushImmutable | PushSlotsIndirect | PushUniformIndirect
        | PushImmutableIndirect | PushClone | PushCloneFromStack | PushCloneIndirectFromStack | PadStack => a,
        PushConditionMask | PushLoopMask | PushReturnMask => 1,
        PushSrcRgba | PushDstRgba | PushDeviceXY01 => 4,
        PopConditionMask | PopLoopMask | PopReturnMask | PopAndReenableLoopMask | MergeLoopMask => -1,
        PopSrcRg => -2,
        PopSrcRgba | PopDstRgba => -4,
        DiscardStack => -a,
        Binary(..) | Select => -a,
        Ternary(..) => -2 * a,
        Swizzle => c - a,
        Shuffle => b - a,
        DiagonalMatrix => a * b - 1,
        MatrixResize => c * d - a * b,
        MatrixMultiply => c * b - (a * b + c * d),
        Determinant => 1 - a * a,
        Dot => 1 - 2 * a,
        Refract4 => -5,
        CopyStackToSlots | CopyStackToSlotsUnmasked | CopyStackToSlotsIndirect | SwizzleCopyStackToSlots
        | SwizzleCopyStackToSlotsIndirect | CopySlotsMasked | CopySlotsUnmasked | ZeroSlotsUnmasked
        | StoreImmutableValue | InitLaneMasks | MergeConditionMask | MergeInvConditionMask | ReenableLoopMask
        | MaskOffLoopMask | MaskOffReturnMask | ContinueOp | CaseOp | StoreSrcRg | StoreSrc | StoreDst
        | StoreDeviceXY01 | LoadSrc | LoadDst | Unary(..) | BinaryImm(..) | Transpose | Inverse | Label | Jump
        | BranchIfAllLanesActive | BranchIfAnyLanesActive | BranchIfNoLanesActive
        | BranchIfNoActiveLanesOnStackTopEqual | InvokeShader | InvokeColorFilter | InvokeBlender
        | InvokeToLinearSrgb | InvokeFromLinearSrgb | TraceLine | TraceVar | TraceEnter | TraceExit | TraceScope => 0,
    }
}

/// Packs up to eight 4-bit components, first component in the low bits.
pub fn pack_nybbles(components: &[u8]) -> i32 {
    components
        .iter()
        .take(8)
        .enumerate()
        .fold(0u32, |acc, (i, c)| acc | (u32::from(*c & 0xF) << (4 * i))) as i32
}

pub fn unpack_nybbles(packed: i32, count: usize) -> Vec<u8> {
    (0..count.min(8)).map(|i| ((packed as u32 >> (4 * i)) & 0xF) as u8).collect()
}

const FLOAT_SIGN_BIT: u32 = 0x8000_0000;

#[derive(Debug, Default)]
pub struct Builder {
    instructions: Vec<Instruction>,
    current_stack_id: i32,
    num_labels: i32,
    /// Nesting count of constructs that need masked stores.
    mask_writes_enabled: u32,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Finalizes the instruction list into a program.
    pub fn finish(
        self,
        num_value_slots: usize,
        num_uniform_slots: usize,
        num_immutable_slots: usize,
        debug_trace: Option<DebugTrace>,
    ) -> Result<Program> {
        Program::new(
            self.instructions,
            num_value_slots,
            num_uniform_slots,
            num_immutable_slots,
            self.num_labels as usize,
            debug_trace,
        )
    }

    pub fn next_label_id(&mut self) -> i32 {
        let id = self.num_labels;
        self.num_labels += 1;
        id
    }

    pub fn current_stack(&self) -> i32 {
        self.current_stack_id
    }

    pub fn set_current_stack(&mut self, stack_id: i32) {
        self.current_stack_id = stack_id;
    }

    pub fn enable_execution_mask_writes(&mut self) {
        self.mask_writes_enabled += 1;
    }

    pub fn disable_execution_mask_writes(&mut self) {
        debug_assert!(self.mask_writes_enabled > 0);
        self.mask_writes_enabled = self.mask_writes_enabled.saturating_sub(1);
    }

    pub fn execution_mask_writes_enabled(&self) -> bool {
        self.mask_writes_enabled > 0
    }

    fn append(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    fn op(&self, op: BuilderOp) -> Instruction {
        Instruction::new(op, self.current_stack_id)
    }

    /// The instruction `from_back` places from the end, if it belongs to the
    /// current stack.
    fn last_instruction(&self, from_back: usize) -> Option<&Instruction> {
        let index = self.instructions.len().checked_sub(from_back + 1)?;
        let inst = &self.instructions[index];
        (inst.stack_id == self.current_stack_id).then_some(inst)
    }

    fn last_instruction_mut(&mut self) -> Option<&mut Instruction> {
        let stack = self.current_stack_id;
        self.instructions.last_mut().filter(|inst| inst.stack_id == stack)
    }

    fn last_on_any_stack(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    // Control flow

    pub fn label(&mut self, label_id: i32) {
        // Branches to the very next instruction do nothing.
        while let Some(last) = self.last_on_any_stack() {
            if last.op.is_branch() && last.imm_a == label_id {
                self.instructions.pop();
            } else {
                break;
            }
        }
        let inst = self.op(BuilderOp::Label).imm(label_id, 0, 0, 0);
        self.append(inst);
    }

    pub fn jump(&mut self, label_id: i32) {
        if let Some(last) = self.last_on_any_stack() {
            if last.op == BuilderOp::Jump {
                // Unreachable.
                return;
            }
        }
        // A conditional branch to the same place is dead.
        while let Some(last) = self.last_on_any_stack() {
            if last.op.is_branch() && last.op != BuilderOp::Jump && last.imm_a == label_id {
                self.instructions.pop();
            } else {
                break;
            }
        }
        let inst = self.op(BuilderOp::Jump).imm(label_id, 0, 0, 0);
        self.append(inst);
    }

    fn branch(&mut self, op: BuilderOp, label_id: i32, value: i32) {
        if let Some(last) = self.last_on_any_stack() {
            if last.op == BuilderOp::Jump {
                return;
            }
        }
        let inst = self.op(op).imm(label_id, value, 0, 0);
        self.append(inst);
    }

    pub fn branch_if_all_lanes_active(&mut self, label_id: i32) {
        self.branch(BuilderOp::BranchIfAllLanesActive, label_id, 0);
    }

    pub fn branch_if_any_lanes_active(&mut self, label_id: i32) {
        self.branch(BuilderOp::BranchIfAnyLanesActive, label_id, 0);
    }

    pub fn branch_if_no_lanes_active(&mut self, label_id: i32) {
        self.branch(BuilderOp::BranchIfNoLanesActive, label_id, 0);
    }

    /// Branches unless some active lane holds `value` at the stack top.
    pub fn branch_if_no_active_lanes_on_stack_top_equal(&mut self, value: i32, label_id: i32) {
        self.branch(BuilderOp::BranchIfNoActiveLanesOnStackTopEqual, label_id, value);
    }

    // Entry and exit

    pub fn init_lane_masks(&mut self) {
        let inst = self.op(BuilderOp::InitLaneMasks);
        self.append(inst);
    }

    fn range_op(&mut self, op: BuilderOp, range: SlotRange) {
        let inst = self.op(op).slots(Some(range.index), None).imm(range.count as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn store_src_rg(&mut self, slots: SlotRange) {
        debug_assert_eq!(slots.count, 2);
        self.range_op(BuilderOp::StoreSrcRg, slots);
    }

    pub fn store_src(&mut self, slots: SlotRange) {
        debug_assert_eq!(slots.count, 4);
        self.range_op(BuilderOp::StoreSrc, slots);
    }

    pub fn store_dst(&mut self, slots: SlotRange) {
        debug_assert_eq!(slots.count, 4);
        self.range_op(BuilderOp::StoreDst, slots);
    }

    pub fn store_device_xy01(&mut self, slots: SlotRange) {
        debug_assert_eq!(slots.count, 4);
        self.range_op(BuilderOp::StoreDeviceXY01, slots);
    }

    pub fn load_src(&mut self, slots: SlotRange) {
        debug_assert_eq!(slots.count, 4);
        self.range_op(BuilderOp::LoadSrc, slots);
    }

    pub fn load_dst(&mut self, slots: SlotRange) {
        debug_assert_eq!(slots.count, 4);
        self.range_op(BuilderOp::LoadDst, slots);
    }

    // Pushes

    pub fn push_constant_bits(&mut self, bits: u32, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(last) = self.last_instruction_mut() {
            if last.op == BuilderOp::PushConstant && last.imm_b as u32 == bits {
                last.imm_a += count as i32;
                return;
            }
        }
        let inst = self.op(BuilderOp::PushConstant).imm(count as i32, bits as i32, 0, 0);
        self.append(inst);
    }

    pub fn push_literal_f(&mut self, value: f32) {
        self.push_constant_bits(value.to_bits(), 1);
    }

    pub fn push_literal_i(&mut self, value: i32) {
        self.push_constant_bits(value as u32, 1);
    }

    pub fn push_literal_u(&mut self, value: u32) {
        self.push_constant_bits(value, 1);
    }

    pub fn push_zeros(&mut self, count: usize) {
        self.push_constant_bits(0, count);
    }

    fn push_range(&mut self, op: BuilderOp, src: SlotRange) {
        if src.count == 0 {
            return;
        }
        if let Some(last) = self.last_instruction_mut() {
            if last.op == op && last.slot_a.map(|a| a + last.imm_a as usize) == Some(src.index) {
                last.imm_a += src.count as i32;
                return;
            }
        }
        self.range_op(op, src);
    }

    pub fn push_slots(&mut self, src: SlotRange) {
        self.push_range(BuilderOp::PushSlots, src);
    }

    pub fn push_uniform(&mut self, src: SlotRange) {
        self.push_range(BuilderOp::PushUniform, src);
    }

    pub fn push_immutable(&mut self, src: SlotRange) {
        self.push_range(BuilderOp::PushImmutable, src);
    }

    fn push_indirect(&mut self, op: BuilderOp, fixed: SlotRange, offset_stack: i32, limit: usize) {
        let inst = self
            .op(op)
            .slots(Some(fixed.index), Some(limit))
            .imm(fixed.count as i32, offset_stack, 0, 0);
        self.append(inst);
    }

    /// Pushes `fixed.count` slots starting at `fixed.index` plus the offset
    /// at the top of `offset_stack`, never reading past `limit`.
    pub fn push_slots_indirect(&mut self, fixed: SlotRange, offset_stack: i32, limit: usize) {
        self.push_indirect(BuilderOp::PushSlotsIndirect, fixed, offset_stack, limit);
    }

    pub fn push_uniform_indirect(&mut self, fixed: SlotRange, offset_stack: i32, limit: usize) {
        self.push_indirect(BuilderOp::PushUniformIndirect, fixed, offset_stack, limit);
    }

    pub fn push_immutable_indirect(&mut self, fixed: SlotRange, offset_stack: i32, limit: usize) {
        self.push_indirect(BuilderOp::PushImmutableIndirect, fixed, offset_stack, limit);
    }

    /// Pushes a copy of `count` slots, the first of which sits `distance`
    /// slots below the stack top.
    pub fn push_clone(&mut self, count: usize, distance: usize) {
        if count == 0 {
            return;
        }
        debug_assert!(distance >= count);
        let inst = self.op(BuilderOp::PushClone).imm(count as i32, distance as i32, 0, 0);
        self.append(inst);
    }

    pub fn push_clone_from_stack(&mut self, count: usize, other_stack: i32, distance: usize) {
        if count == 0 {
            return;
        }
        let inst = self
            .op(BuilderOp::PushCloneFromStack)
            .imm(count as i32, other_stack, distance as i32, 0);
        self.append(inst);
    }

    /// Like [`Builder::push_clone_from_stack`], displaced by the offset at the
    /// top of `offset_stack` and clamped to the other stack's top.
    pub fn push_clone_indirect_from_stack(&mut self, count: usize, other_stack: i32, distance: usize, offset_stack: i32) {
        let inst = self
            .op(BuilderOp::PushCloneIndirectFromStack)
            .imm(count as i32, other_stack, distance as i32, offset_stack);
        self.append(inst);
    }

    /// Repeats the top slot `count` more times.
    pub fn push_duplicates(&mut self, mut count: usize) {
        while count > 0 {
            let chunk = count.min(15);
            self.swizzle(1, &vec![0u8; chunk + 1]);
            count -= chunk;
        }
    }

    fn push_mask(&mut self, push: BuilderOp, pop: BuilderOp) {
        // The slot just popped still holds the mask.
        if let Some(last) = self.last_instruction(0) {
            if last.op == pop {
                self.pad_stack(1);
                return;
            }
        }
        let inst = self.op(push);
        self.append(inst);
    }

    pub fn push_condition_mask(&mut self) {
        self.push_mask(BuilderOp::PushConditionMask, BuilderOp::PopConditionMask);
    }

    pub fn push_loop_mask(&mut self) {
        self.push_mask(BuilderOp::PushLoopMask, BuilderOp::PopLoopMask);
    }

    pub fn push_return_mask(&mut self) {
        self.push_mask(BuilderOp::PushReturnMask, BuilderOp::PopReturnMask);
    }

    pub fn pad_stack(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let inst = self.op(BuilderOp::PadStack).imm(count as i32, 0, 0, 0);
        self.append(inst);
    }

    fn simple(&mut self, op: BuilderOp) {
        let inst = self.op(op);
        self.append(inst);
    }

    pub fn push_src_rgba(&mut self) {
        self.simple(BuilderOp::PushSrcRgba);
    }

    pub fn push_dst_rgba(&mut self) {
        self.simple(BuilderOp::PushDstRgba);
    }

    pub fn push_device_xy01(&mut self) {
        self.simple(BuilderOp::PushDeviceXY01);
    }

    // Pops

    pub fn pop_condition_mask(&mut self) {
        self.simple(BuilderOp::PopConditionMask);
    }

    pub fn pop_loop_mask(&mut self) {
        self.simple(BuilderOp::PopLoopMask);
    }

    pub fn pop_return_mask(&mut self) {
        self.simple(BuilderOp::PopReturnMask);
    }

    pub fn pop_and_reenable_loop_mask(&mut self) {
        self.simple(BuilderOp::PopAndReenableLoopMask);
    }

    pub fn pop_src_rg(&mut self) {
        self.simple(BuilderOp::PopSrcRg);
    }

    pub fn pop_src_rgba(&mut self) {
        self.simple(BuilderOp::PopSrcRgba);
    }

    pub fn pop_dst_rgba(&mut self) {
        self.simple(BuilderOp::PopDstRgba);
    }

    pub fn discard_stack(&mut self, mut count: usize) {
        while count > 0 {
            let Some(last) = self.last_instruction(0).copied() else {
                break;
            };
            match last.op {
                BuilderOp::DiscardStack => {
                    if let Some(last) = self.last_instruction_mut() {
                        last.imm_a += count as i32;
                    }
                    return;
                }
                op if op.is_trimmable_push() => {
                    let trimmed = (last.imm_a as usize).min(count);
                    count -= trimmed;
                    if trimmed == last.imm_a as usize {
                        self.instructions.pop();
                    } else if let Some(last) = self.last_instruction_mut() {
                        last.imm_a -= trimmed as i32;
                    }
                }
                // In-place ops on slots that are about to be thrown away.
                BuilderOp::Unary(..) | BuilderOp::BinaryImm(..)
                    if last.slot_a.is_none() && last.imm_a as usize <= count =>
                {
                    self.instructions.pop();
                }
                BuilderOp::CopyStackToSlotsUnmasked
                    if last.imm_b == last.imm_a && last.imm_a as usize <= count =>
                {
                    if !self.simplify_pop_slots_unmasked() {
                        break;
                    }
                    count -= last.imm_a as usize;
                }
                _ => break,
            }
        }
        if count > 0 {
            let inst = self.op(BuilderOp::DiscardStack).imm(count as i32, 0, 0, 0);
            self.append(inst);
        }
    }

    /// Rewrites `push_slots; [imm op]; copy_stack_to_slots_unmasked` whose
    /// copied value is about to be discarded into an equivalent sequence that
    /// never touches the stack.
    fn simplify_pop_slots_unmasked(&mut self) -> bool {
        let Some(copy) = self.last_instruction(0).copied() else {
            return false;
        };
        let Some(dst) = copy.slot_a else {
            return false;
        };
        let count = copy.imm_a;
        let Some(prev) = self.last_instruction(1).copied() else {
            return false;
        };
        if prev.op == BuilderOp::PushSlots && prev.imm_a == count {
            let Some(src) = prev.slot_a else {
                return false;
            };
            // The stack holds a snapshot; a slot-to-slot copy between
            // overlapping ranges would read slots it already wrote.
            let count_slots = count as usize;
            if src != dst && src < dst + count_slots && dst < src + count_slots {
                return false;
            }
            self.instructions.truncate(self.instructions.len() - 2);
            if src != dst {
                self.copy_slots_unmasked(SlotRange::new(dst, count as usize), SlotRange::new(src, count as usize));
            }
            return true;
        }
        if let BuilderOp::BinaryImm(..) = prev.op {
            if prev.slot_a.is_none() && prev.imm_a == count {
                if let Some(push) = self.last_instruction(2).copied() {
                    if push.op == BuilderOp::PushSlots && push.imm_a == count && push.slot_a == Some(dst) {
                        // The op can run directly on the destination slots.
                        let len = self.instructions.len();
                        self.instructions.truncate(len - 3);
                        let mut in_place = prev;
                        in_place.slot_a = Some(dst);
                        self.append(in_place);
                        return true;
                    }
                }
            }
        }
        false
    }

    // Stores

    /// Copies `dst.count` slots starting `distance` below the stack top,
    /// honoring the execution mask if mask writes are enabled.
    pub fn copy_stack_to_slots(&mut self, dst: SlotRange, distance: usize) {
        if !self.execution_mask_writes_enabled() {
            self.copy_stack_to_slots_unmasked(dst, distance);
            return;
        }
        if dst.count == 0 {
            return;
        }
        let inst = self
            .op(BuilderOp::CopyStackToSlots)
            .slots(Some(dst.index), None)
            .imm(dst.count as i32, distance as i32, 0, 0);
        self.append(inst);
    }

    pub fn copy_stack_to_slots_unmasked(&mut self, dst: SlotRange, distance: usize) {
        if dst.count == 0 {
            return;
        }
        let inst = self
            .op(BuilderOp::CopyStackToSlotsUnmasked)
            .slots(Some(dst.index), None)
            .imm(dst.count as i32, distance as i32, 0, 0);
        self.append(inst);
    }

    pub fn copy_stack_to_slots_indirect(&mut self, fixed: SlotRange, offset_stack: i32, limit: usize, distance: usize) {
        let inst = self
            .op(BuilderOp::CopyStackToSlotsIndirect)
            .slots(Some(fixed.index), Some(limit))
            .imm(fixed.count as i32, offset_stack, distance as i32, 0);
        self.append(inst);
    }

    /// Scatters the top `components.len()` slots into `dst` at the given
    /// component positions.
    pub fn swizzle_copy_stack_to_slots(&mut self, dst: SlotRange, components: &[u8], distance: usize) {
        let inst = self
            .op(BuilderOp::SwizzleCopyStackToSlots)
            .slots(Some(dst.index), None)
            .imm(components.len() as i32, pack_nybbles(components), distance as i32, 0);
        self.append(inst);
    }

    pub fn swizzle_copy_stack_to_slots_indirect(
        &mut self,
        fixed: SlotRange,
        offset_stack: i32,
        limit: usize,
        components: &[u8],
        distance: usize,
    ) {
        let inst = self
            .op(BuilderOp::SwizzleCopyStackToSlotsIndirect)
            .slots(Some(fixed.index), Some(limit))
            .imm(components.len() as i32, pack_nybbles(components), distance as i32, offset_stack);
        self.append(inst);
    }

    pub fn pop_slots(&mut self, dst: SlotRange) {
        self.copy_stack_to_slots(dst, dst.count);
        self.discard_stack(dst.count);
    }

    pub fn pop_slots_indirect(&mut self, fixed: SlotRange, offset_stack: i32, limit: usize) {
        self.copy_stack_to_slots_indirect(fixed, offset_stack, limit, fixed.count);
        self.discard_stack(fixed.count);
    }

    pub fn pop_slots_unmasked(&mut self, dst: SlotRange) {
        self.copy_stack_to_slots_unmasked(dst, dst.count);
        self.discard_stack(dst.count);
    }

    pub fn copy_slots_masked(&mut self, dst: SlotRange, src: SlotRange) {
        debug_assert_eq!(dst.count, src.count);
        if dst.count == 0 {
            return;
        }
        let inst = self
            .op(BuilderOp::CopySlotsMasked)
            .slots(Some(dst.index), Some(src.index))
            .imm(dst.count as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn copy_slots_unmasked(&mut self, dst: SlotRange, src: SlotRange) {
        debug_assert_eq!(dst.count, src.count);
        if dst.count == 0 {
            return;
        }
        // Extend a copy that ends where this one begins.
        if let Some(last) = self.last_instruction_mut() {
            if last.op == BuilderOp::CopySlotsUnmasked {
                let count = last.imm_a as usize;
                if last.slot_a.map(|a| a + count) == Some(dst.index) && last.slot_b.map(|b| b + count) == Some(src.index)
                {
                    last.imm_a += dst.count as i32;
                    return;
                }
            }
        }
        let inst = self
            .op(BuilderOp::CopySlotsUnmasked)
            .slots(Some(dst.index), Some(src.index))
            .imm(dst.count as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn zero_slots_unmasked(&mut self, dst: SlotRange) {
        if dst.count == 0 {
            return;
        }
        if let Some(last) = self.last_instruction_mut() {
            if last.op == BuilderOp::ZeroSlotsUnmasked && last.slot_a.map(|a| a + last.imm_a as usize) == Some(dst.index)
            {
                last.imm_a += dst.count as i32;
                return;
            }
        }
        self.range_op(BuilderOp::ZeroSlotsUnmasked, dst);
    }

    pub fn store_immutable_value(&mut self, slot: usize, bits: u32) {
        let inst = self
            .op(BuilderOp::StoreImmutableValue)
            .slots(Some(slot), None)
            .imm(bits as i32, 0, 0, 0);
        self.append(inst);
    }

    // Masks

    /// Condition mask becomes `saved & test`, with the saved mask below the
    /// test on the stack. Neither is popped.
    pub fn merge_condition_mask(&mut self) {
        self.simple(BuilderOp::MergeConditionMask);
    }

    /// Condition mask becomes `saved & !test`.
    pub fn merge_inv_condition_mask(&mut self) {
        self.simple(BuilderOp::MergeInvConditionMask);
    }

    /// Loop mask &= stack top, which is popped.
    pub fn merge_loop_mask(&mut self) {
        self.simple(BuilderOp::MergeLoopMask);
    }

    /// Loop mask |= stack top, which stays.
    pub fn reenable_loop_mask(&mut self) {
        self.simple(BuilderOp::ReenableLoopMask);
    }

    pub fn mask_off_loop_mask(&mut self) {
        self.simple(BuilderOp::MaskOffLoopMask);
    }

    pub fn mask_off_return_mask(&mut self) {
        self.simple(BuilderOp::MaskOffReturnMask);
    }

    /// Moves the active lanes from the loop mask into the continue mask on
    /// top of `continue_stack`.
    pub fn continue_op(&mut self, continue_stack: i32) {
        let inst = self.op(BuilderOp::ContinueOp).imm(continue_stack, 0, 0, 0);
        self.append(inst);
    }

    /// With `[value, default_mask]` on top of the stack, reactivates the lanes
    /// whose value equals `case_value` and takes them out of the default mask.
    pub fn case_op(&mut self, case_value: i32) {
        let inst = self.op(BuilderOp::CaseOp).imm(case_value, 0, 0, 0);
        self.append(inst);
    }

    // Arithmetic

    pub fn unary_op(&mut self, op: UnaryOp, ty: NumType, count: usize) {
        if count == 0 {
            return;
        }
        let inst = self.op(BuilderOp::Unary(op, ty)).imm(count as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn binary_op(&mut self, op: BinaryOp, ty: NumType, count: usize) {
        if count == 0 {
            return;
        }
        let ty = op.canonical_type(ty);
        if op.has_immediate_form(ty) && self.fold_immediate(op, ty, count) {
            return;
        }
        let inst = self.op(BuilderOp::Binary(op, ty)).imm(count as i32, 0, 0, 0);
        self.append(inst);
    }

    /// Rewrites a binary op whose operand is a just-pushed constant into its
    /// immediate form.
    fn fold_immediate(&mut self, op: BinaryOp, ty: NumType, count: usize) -> bool {
        let Some(last) = self.last_instruction(0).copied() else {
            return false;
        };
        let constant_index = if last.op == BuilderOp::PushConstant && last.imm_a as usize >= count {
            self.instructions.len() - 1
        } else if op.is_commutative()
            && matches!(
                last.op,
                BuilderOp::PushSlots | BuilderOp::PushUniform | BuilderOp::PushImmutable
            )
            && last.imm_a as usize == count
        {
            match self.last_instruction(1) {
                Some(prev) if prev.op == BuilderOp::PushConstant && prev.imm_a as usize >= count => {
                    self.instructions.len() - 2
                }
                _ => return false,
            }
        } else {
            return false;
        };
        let constant = self.instructions[constant_index];
        let mut bits = constant.imm_b as u32;
        // A NaN operand's sign and payload depend on operand order, so NaN
        // constants only fold where the order is unchanged.
        let swapped = constant_index != self.instructions.len() - 1;
        if ty == NumType::Float && f32::from_bits(bits).is_nan() && (swapped || op == BinaryOp::Sub) {
            return false;
        }
        if constant.imm_a as usize == count {
            self.instructions.remove(constant_index);
        } else {
            self.instructions[constant_index].imm_a -= count as i32;
        }
        let op = match op {
            BinaryOp::Sub => {
                bits = match ty {
                    NumType::Float => bits ^ FLOAT_SIGN_BIT,
                    NumType::Int | NumType::Uint => (bits as i32).wrapping_neg() as u32,
                };
                BinaryOp::Add
            }
            other => other,
        };
        let inst = self
            .op(BuilderOp::BinaryImm(op, ty))
            .imm(count as i32, bits as i32, 0, 0);
        self.append(inst);
        true
    }

    pub fn ternary_op(&mut self, op: TernaryOp, ty: NumType, count: usize) {
        if count == 0 {
            return;
        }
        let inst = self.op(BuilderOp::Ternary(op, ty)).imm(count as i32, 0, 0, 0);
        self.append(inst);
    }

    /// With `[a, b]` on the stack, replaces `a` with `b` in active lanes.
    pub fn select(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let inst = self.op(BuilderOp::Select).imm(count as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn dot(&mut self, components: usize) {
        let inst = self.op(BuilderOp::Dot).imm(components as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn refract4(&mut self) {
        self.simple(BuilderOp::Refract4);
    }

    /// Consumes `consumed` slots and produces one slot per entry of
    /// `components`, each an index into the consumed slots.
    pub fn swizzle(&mut self, mut consumed: usize, components: &[u8]) {
        let mut elements: Vec<u8> = components.to_vec();
        // A leading identity component can stay where it is.
        while let Some(&first) = elements.first() {
            if first != 0 || elements[1..].contains(&0) {
                break;
            }
            elements = elements[1..].iter().map(|e| e - 1).collect();
            consumed -= 1;
        }
        if elements.is_empty() {
            self.discard_stack(consumed);
            return;
        }
        if consumed <= 4 && elements.len() <= 4 {
            let inst = self
                .op(BuilderOp::Swizzle)
                .imm(consumed as i32, pack_nybbles(&elements), elements.len() as i32, 0);
            self.append(inst);
            return;
        }
        debug_assert!(elements.len() <= 16);
        let high = if elements.len() > 8 { pack_nybbles(&elements[8..]) } else { 0 };
        let inst = self
            .op(BuilderOp::Shuffle)
            .imm(consumed as i32, elements.len() as i32, pack_nybbles(&elements), high);
        self.append(inst);
    }

    pub fn transpose(&mut self, columns: usize, rows: usize) {
        let inst = self.op(BuilderOp::Transpose).imm(columns as i32, rows as i32, 0, 0);
        self.append(inst);
    }

    pub fn diagonal_matrix(&mut self, columns: usize, rows: usize) {
        let inst = self.op(BuilderOp::DiagonalMatrix).imm(columns as i32, rows as i32, 0, 0);
        self.append(inst);
    }

    pub fn matrix_resize(&mut self, from: (usize, usize), to: (usize, usize)) {
        let inst = self
            .op(BuilderOp::MatrixResize)
            .imm(from.0 as i32, from.1 as i32, to.0 as i32, to.1 as i32);
        self.append(inst);
    }

    pub fn matrix_multiply(&mut self, left: (usize, usize), right: (usize, usize)) {
        let inst = self
            .op(BuilderOp::MatrixMultiply)
            .imm(left.0 as i32, left.1 as i32, right.0 as i32, right.1 as i32);
        self.append(inst);
    }

    pub fn inverse_matrix(&mut self, size: usize) {
        let inst = self.op(BuilderOp::Inverse).imm(size as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn determinant(&mut self, size: usize) {
        let inst = self.op(BuilderOp::Determinant).imm(size as i32, 0, 0, 0);
        self.append(inst);
    }

    // Host calls

    pub fn invoke_shader(&mut self, child: usize) {
        let inst = self.op(BuilderOp::InvokeShader).imm(child as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn invoke_color_filter(&mut self, child: usize) {
        let inst = self.op(BuilderOp::InvokeColorFilter).imm(child as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn invoke_blender(&mut self, child: usize) {
        let inst = self.op(BuilderOp::InvokeBlender).imm(child as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn invoke_to_linear_srgb(&mut self) {
        self.simple(BuilderOp::InvokeToLinearSrgb);
    }

    pub fn invoke_from_linear_srgb(&mut self) {
        self.simple(BuilderOp::InvokeFromLinearSrgb);
    }

    // Tracing

    pub fn trace_line(&mut self, line: usize) {
        let inst = self.op(BuilderOp::TraceLine).imm(line as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn trace_var(&mut self, slots: SlotRange) {
        if slots.count > 0 {
            self.range_op(BuilderOp::TraceVar, slots);
        }
    }

    pub fn trace_enter(&mut self, function: usize) {
        let inst = self.op(BuilderOp::TraceEnter).imm(function as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn trace_exit(&mut self, function: usize) {
        let inst = self.op(BuilderOp::TraceExit).imm(function as i32, 0, 0, 0);
        self.append(inst);
    }

    pub fn trace_scope(&mut self, delta: i32) {
        let inst = self.op(BuilderOp::TraceScope).imm(delta, 0, 0, 0);
        self.append(inst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(builder: &Builder) -> Vec<BuilderOp> {
        builder.instructions().iter().map(|i| i.op).collect()
    }

    #[test]
    fn test_adjacent_pushes_merge() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 2));
        b.push_slots(SlotRange::new(2, 1));
        b.push_zeros(1);
        b.push_zeros(2);
        assert_eq!(ops(&b), vec![BuilderOp::PushSlots, BuilderOp::PushConstant]);
        assert_eq!(b.instructions()[0].imm_a, 3);
        assert_eq!(b.instructions()[1].imm_a, 3);
    }

    #[test]
    fn test_discard_cancels_pushes() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 2));
        b.push_literal_f(1.0);
        b.discard_stack(2);
        assert_eq!(ops(&b), vec![BuilderOp::PushSlots]);
        assert_eq!(b.instructions()[0].imm_a, 1);
        b.discard_stack(1);
        assert!(b.instructions().is_empty());
    }

    #[test]
    fn test_discards_merge() {
        let mut b = Builder::new();
        b.push_src_rgba();
        b.discard_stack(1);
        b.discard_stack(3);
        assert_eq!(ops(&b), vec![BuilderOp::PushSrcRgba, BuilderOp::DiscardStack]);
        assert_eq!(b.instructions()[1].imm_a, 4);
    }

    #[test]
    fn test_discard_stays_on_its_stack() {
        let mut b = Builder::new();
        b.push_literal_f(1.0);
        b.set_current_stack(1);
        b.push_literal_f(2.0);
        b.set_current_stack(0);
        b.discard_stack(1);
        assert_eq!(
            ops(&b),
            vec![BuilderOp::PushConstant, BuilderOp::PushConstant, BuilderOp::DiscardStack]
        );
    }

    #[test]
    fn test_constant_operand_becomes_immediate() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 1));
        b.push_literal_f(2.0);
        b.binary_op(BinaryOp::Mul, NumType::Float, 1);
        assert_eq!(
            ops(&b),
            vec![BuilderOp::PushSlots, BuilderOp::BinaryImm(BinaryOp::Mul, NumType::Float)]
        );
        assert_eq!(b.instructions()[1].imm_b as u32, 2.0f32.to_bits());
    }

    #[test]
    fn test_subtraction_becomes_negated_addition() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 1));
        b.push_literal_f(3.0);
        b.binary_op(BinaryOp::Sub, NumType::Float, 1);
        let last = b.instructions()[1];
        assert_eq!(last.op, BuilderOp::BinaryImm(BinaryOp::Add, NumType::Float));
        assert_eq!(f32::from_bits(last.imm_b as u32), -3.0);

        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 1));
        b.push_literal_i(5);
        b.binary_op(BinaryOp::Sub, NumType::Int, 1);
        assert_eq!(b.instructions()[1].imm_b, -5);
    }

    #[test]
    fn test_commutative_constant_left_operand_is_swapped() {
        let mut b = Builder::new();
        b.push_literal_i(3);
        b.push_slots(SlotRange::new(4, 1));
        b.binary_op(BinaryOp::Add, NumType::Int, 1);
        assert_eq!(
            ops(&b),
            vec![BuilderOp::PushSlots, BuilderOp::BinaryImm(BinaryOp::Add, NumType::Int)]
        );

        // Order matters for comparisons.
        let mut b = Builder::new();
        b.push_literal_i(3);
        b.push_slots(SlotRange::new(4, 1));
        b.binary_op(BinaryOp::CmpLt, NumType::Int, 1);
        assert_eq!(b.instructions().len(), 3);
    }

    #[test]
    fn test_splatted_constant_is_shared() {
        let mut b = Builder::new();
        b.push_zeros(3);
        b.push_zeros(1);
        // Only the top slot is the right operand.
        b.binary_op(BinaryOp::Max, NumType::Float, 1);
        let insts = b.instructions();
        assert_eq!(insts[0].op, BuilderOp::PushConstant);
        assert_eq!(insts[0].imm_a, 3);
        assert_eq!(insts[1].op, BuilderOp::BinaryImm(BinaryOp::Max, NumType::Float));
    }

    #[test]
    fn test_pop_of_pushed_slots_becomes_copy() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 2));
        b.pop_slots_unmasked(SlotRange::new(4, 2));
        assert_eq!(ops(&b), vec![BuilderOp::CopySlotsUnmasked]);

        let mut b = Builder::new();
        b.push_slots(SlotRange::new(3, 2));
        b.pop_slots_unmasked(SlotRange::new(3, 2));
        assert!(b.instructions().is_empty());
    }

    #[test]
    fn test_pop_into_overlapping_slots_goes_through_stack() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 3));
        b.pop_slots_unmasked(SlotRange::new(1, 3));
        assert_eq!(
            ops(&b),
            vec![BuilderOp::PushSlots, BuilderOp::CopyStackToSlotsUnmasked, BuilderOp::DiscardStack]
        );

        let mut b = Builder::new();
        b.push_slots(SlotRange::new(2, 2));
        b.pop_slots_unmasked(SlotRange::new(1, 2));
        assert_eq!(
            ops(&b),
            vec![BuilderOp::PushSlots, BuilderOp::CopyStackToSlotsUnmasked, BuilderOp::DiscardStack]
        );
    }

    /// Runs `x OP c` with the constant folded into an immediate, and with
    /// both operands read from slots, returning the result bits of each.
    fn immediate_and_slot_forms(op: BinaryOp, ty: NumType, x: u32, c: u32, constant_first: bool) -> (u32, u32) {
        use crate::rp::interp::{evaluate, Pixel};

        let build = |fold: bool| {
            let mut b = Builder::new();
            b.init_lane_masks();
            b.push_constant_bits(x, 1);
            b.pop_slots_unmasked(SlotRange::new(0, 1));
            b.push_constant_bits(c, 1);
            b.pop_slots_unmasked(SlotRange::new(1, 1));
            match (fold, constant_first) {
                (true, false) => {
                    b.push_slots(SlotRange::new(0, 1));
                    b.push_constant_bits(c, 1);
                }
                (true, true) => {
                    b.push_constant_bits(c, 1);
                    b.push_slots(SlotRange::new(0, 1));
                }
                (false, false) => {
                    b.push_slots(SlotRange::new(0, 1));
                    b.push_slots(SlotRange::new(1, 1));
                }
                (false, true) => {
                    b.push_slots(SlotRange::new(1, 1));
                    b.push_slots(SlotRange::new(0, 1));
                }
            }
            b.binary_op(op, ty, 1);
            let folded = matches!(b.instructions().last().map(|i| i.op), Some(BuilderOp::BinaryImm(..)));
            b.push_zeros(3);
            b.pop_src_rgba();
            (b.finish(2, 0, 0, None).unwrap(), folded)
        };
        let run = |program: Program| {
            evaluate(&program, 4, None, &[], &[Pixel::at(0.0, 0.0)]).unwrap().colors[0][0].to_bits()
        };

        let (folded_program, folded) = build(true);
        let (slot_program, unfolded) = build(false);
        assert!(!unfolded);
        let nan_constant = ty == NumType::Float && f32::from_bits(c).is_nan();
        if !nan_constant && (!constant_first || op.is_commutative()) {
            assert!(folded, "{:?} {:?} did not fold", op, ty);
        }
        (run(folded_program), run(slot_program))
    }

    #[test]
    fn test_immediate_forms_match_binary_ops() {
        let _ = env_logger::builder().is_test(true).try_init();
        let floats: Vec<u32> = [0.0f32, -0.0, 1.5, -2.25, f32::MAX, f32::INFINITY, f32::NEG_INFINITY, f32::NAN]
            .iter()
            .map(|v| v.to_bits())
            .chain([0x7FC0_1234, 0xFFC0_0001])
            .collect();
        let ints: Vec<u32> = [0, 1, -1, -7, i32::MAX, i32::MIN].iter().map(|&v| v as u32).collect();
        let uints: Vec<u32> = vec![0, 1, 7, u32::MAX, 0x8000_0000];
        let binary_ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Min,
            BinaryOp::Max,
            BinaryOp::CmpLt,
            BinaryOp::CmpLe,
            BinaryOp::CmpEq,
            BinaryOp::CmpNe,
        ];
        for (ty, values) in [(NumType::Float, &floats), (NumType::Int, &ints), (NumType::Uint, &uints)] {
            for op in binary_ops {
                for &x in values.iter() {
                    for &c in values.iter() {
                        for constant_first in [false, true] {
                            let (folded, plain) = immediate_and_slot_forms(op, ty, x, c, constant_first);
                            assert_eq!(
                                folded, plain,
                                "{:?} {:?} x={:#x} c={:#x} constant_first={}",
                                op, ty, x, c, constant_first
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_immediate_op_runs_in_place() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(7, 1));
        b.push_literal_i(1);
        b.binary_op(BinaryOp::Add, NumType::Int, 1);
        b.pop_slots_unmasked(SlotRange::new(7, 1));
        let insts = b.instructions();
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].op, BuilderOp::BinaryImm(BinaryOp::Add, NumType::Int));
        assert_eq!(insts[0].slot_a, Some(7));
    }

    #[test]
    fn test_masked_pop_is_not_simplified() {
        let mut b = Builder::new();
        b.enable_execution_mask_writes();
        b.push_slots(SlotRange::new(0, 1));
        b.pop_slots(SlotRange::new(1, 1));
        assert_eq!(
            ops(&b),
            vec![BuilderOp::PushSlots, BuilderOp::CopyStackToSlots, BuilderOp::DiscardStack]
        );
    }

    #[test]
    fn test_branch_to_next_label_is_dropped() {
        let mut b = Builder::new();
        let label = b.next_label_id();
        b.branch_if_no_lanes_active(label);
        b.jump(label);
        b.label(label);
        assert_eq!(ops(&b), vec![BuilderOp::Label]);
    }

    #[test]
    fn test_code_after_jump_is_unreachable() {
        let mut b = Builder::new();
        let (a, c) = (b.next_label_id(), b.next_label_id());
        b.jump(a);
        b.jump(c);
        b.branch_if_any_lanes_active(c);
        assert_eq!(ops(&b), vec![BuilderOp::Jump]);
    }

    #[test]
    fn test_repushing_popped_mask_pads() {
        let mut b = Builder::new();
        b.push_condition_mask();
        b.pop_condition_mask();
        b.push_condition_mask();
        assert_eq!(
            ops(&b),
            vec![BuilderOp::PushConditionMask, BuilderOp::PopConditionMask, BuilderOp::PadStack]
        );
    }

    #[test]
    fn test_swizzle_normalization() {
        let mut b = Builder::new();
        b.push_slots(SlotRange::new(0, 4));
        // .xy of a four-slot value is a discard of the top two.
        b.swizzle(4, &[0, 1]);
        assert_eq!(ops(&b), vec![BuilderOp::PushSlots]);
        assert_eq!(b.instructions()[0].imm_a, 2);

        let mut b = Builder::new();
        b.swizzle(3, &[0, 2, 1]);
        let inst = b.instructions()[0];
        assert_eq!(inst.op, BuilderOp::Swizzle);
        assert_eq!(inst.imm_a, 2);
        assert_eq!(unpack_nybbles(inst.imm_b, inst.imm_c as usize), vec![1, 0]);

        let mut b = Builder::new();
        b.swizzle(1, &[0, 0, 0]);
        assert_eq!(b.instructions()[0].imm_a, 1);
        assert_eq!(stack_usage(&b.instructions()[0]), 2);
    }

    #[test]
    fn test_large_swizzles_shuffle() {
        let mut b = Builder::new();
        b.swizzle(6, &[5, 4, 3, 2, 1, 0]);
        let inst = b.instructions()[0];
        assert_eq!(inst.op, BuilderOp::Shuffle);
        assert_eq!(stack_usage(&inst), 0);
    }

    #[test]
    fn test_nybble_packing() {
        let packed = pack_nybbles(&[3, 0, 2, 1]);
        assert_eq!(packed, 0x1203);
        assert_eq!(unpack_nybbles(packed, 4), vec![3, 0, 2, 1]);
    }

    #[test]
    fn test_stack_usage_of_matrix_ops() {
        let mut b = Builder::new();
        b.matrix_multiply((2, 2), (1, 2));
        b.diagonal_matrix(3, 3);
        b.determinant(4);
        let usages: Vec<i32> = b.instructions().iter().map(stack_usage).collect();
        assert_eq!(usages, vec![-4, 8, -15]);
    }
}
