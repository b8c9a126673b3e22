//! A scalar reference interpreter for lowered stages.
//!
//! Lanes are simulated one `u32` at a time. Masks are all-ones or zero per
//! lane and a lane executes when its condition, loop and return masks are
//! all set.

use super::builder::{BinaryOp, NumType, TernaryOp, UnaryOp};
use super::debug_trace::{TraceInfo, TraceOp};
use super::pipeline::{Callbacks, Pipeline};
use super::program::{Program, SlotData};
use super::stages::{BranchKind, ColorRegisters, SlotSpace, Stage};
use crate::bail_pipeline;
use crate::error::Result;
use log::{debug, trace};

const MAX_STEPS: usize = 10_000_000;
const ALL_ONES: u32 = !0;

/// One pixel's worth of input registers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pixel {
    pub src: [f32; 4],
    pub dst: [f32; 4],
    pub device: [f32; 2],
}

impl Pixel {
    /// A shader invocation at local coordinates `(x, y)`.
    pub fn at(x: f32, y: f32) -> Pixel {
        Pixel {
            src: [x, y, 0.0, 0.0],
            dst: [0.0; 4],
            device: [x, y],
        }
    }

    /// A color filter or blender invocation.
    pub fn color(src: [f32; 4], dst: [f32; 4]) -> Pixel {
        Pixel {
            src,
            dst,
            device: [0.0; 2],
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RunOutput {
    pub colors: Vec<[f32; 4]>,
    /// Trace events recorded for the first lane of each batch.
    pub trace: Vec<TraceInfo>,
}

#[derive(Debug)]
pub struct Interpreter {
    stages: Vec<Stage>,
    lane_count: usize,
}

impl Pipeline for Interpreter {
    fn append(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn len(&self) -> usize {
        self.stages.len()
    }
}

struct Machine<'a> {
    lanes: usize,
    active: usize,
    values: &'a mut [u32],
    immutable: &'a [u32],
    uniforms: &'a [u32],
    regs: ColorRegisters,
    device: [Vec<f32>; 2],
    cond: Vec<u32>,
    loop_mask: Vec<u32>,
    ret: Vec<u32>,
    trace: Vec<TraceInfo>,
}

fn f(bits: u32) -> f32 {
    f32::from_bits(bits)
}

fn b(value: bool) -> u32 {
    if value {
        ALL_ONES
    } else {
        0
    }
}

fn unary(op: UnaryOp, ty: NumType, x: u32) -> u32 {
    let float = |g: fn(f32) -> f32| g(f(x)).to_bits();
    match op {
        UnaryOp::Abs => match ty {
            NumType::Float => float(f32::abs),
            NumType::Int => (x as i32).wrapping_abs() as u32,
            NumType::Uint => x,
        },
        UnaryOp::Floor => float(f32::floor),
        UnaryOp::Ceil => float(f32::ceil),
        UnaryOp::Sin => float(f32::sin),
        UnaryOp::Cos => float(f32::cos),
        UnaryOp::Tan => float(f32::tan),
        UnaryOp::Asin => float(f32::asin),
        UnaryOp::Acos => float(f32::acos),
        UnaryOp::Atan => float(f32::atan),
        UnaryOp::Sqrt => float(f32::sqrt),
        UnaryOp::Exp => float(f32::exp),
        UnaryOp::Exp2 => float(f32::exp2),
        UnaryOp::Log => float(f32::ln),
        UnaryOp::Log2 => float(f32::log2),
        UnaryOp::Invsqrt => (1.0 / f(x).sqrt()).to_bits(),
        UnaryOp::BitwiseNot => !x,
        UnaryOp::CastToFloatFromInt => (x as i32 as f32).to_bits(),
        UnaryOp::CastToFloatFromUint => (x as f32).to_bits(),
        UnaryOp::CastToIntFromFloat => f(x) as i32 as u32,
        UnaryOp::CastToUintFromFloat => f(x) as u32,
    }
}

fn binary(op: BinaryOp, ty: NumType, x: u32, y: u32) -> u32 {
    match op {
        BinaryOp::BitwiseAnd => return x & y,
        BinaryOp::BitwiseOr => return x | y,
        BinaryOp::BitwiseXor => return x ^ y,
        _ => {}
    }
    match ty {
        NumType::Float => {
            let (x, y) = (f(x), f(y));
            match op {
                BinaryOp::Add => (x + y).to_bits(),
                BinaryOp::Sub => (x - y).to_bits(),
                BinaryOp::Mul => (x * y).to_bits(),
                BinaryOp::Div => (x / y).to_bits(),
                BinaryOp::Mod => (x - y * (x / y).floor()).to_bits(),
                BinaryOp::Min => x.min(y).to_bits(),
                BinaryOp::Max => x.max(y).to_bits(),
                BinaryOp::CmpLt => b(x < y),
                BinaryOp::CmpLe => b(x <= y),
                BinaryOp::CmpEq => b(x == y),
                BinaryOp::CmpNe => b(x != y),
                BinaryOp::Atan2 => x.atan2(y).to_bits(),
                BinaryOp::Pow => x.powf(y).to_bits(),
                BinaryOp::BitwiseAnd | BinaryOp::BitwiseOr | BinaryOp::BitwiseXor => 0,
            }
        }
        NumType::Int => {
            let (x, y) = (x as i32, y as i32);
            match op {
                BinaryOp::Add => x.wrapping_add(y) as u32,
                BinaryOp::Sub => x.wrapping_sub(y) as u32,
                BinaryOp::Mul => x.wrapping_mul(y) as u32,
                BinaryOp::Div => x.checked_div(y).unwrap_or(0) as u32,
                BinaryOp::Mod => x.checked_rem(y).unwrap_or(0) as u32,
                BinaryOp::Min => x.min(y) as u32,
                BinaryOp::Max => x.max(y) as u32,
                BinaryOp::CmpLt => b(x < y),
                BinaryOp::CmpLe => b(x <= y),
                BinaryOp::CmpEq => b(x == y),
                BinaryOp::CmpNe => b(x != y),
                _ => 0,
            }
        }
        NumType::Uint => match op {
            BinaryOp::Add => x.wrapping_add(y),
            BinaryOp::Sub => x.wrapping_sub(y),
            BinaryOp::Mul => x.wrapping_mul(y),
            BinaryOp::Div => x.checked_div(y).unwrap_or(0),
            BinaryOp::Mod => x.checked_rem(y).unwrap_or(0),
            BinaryOp::Min => x.min(y),
            BinaryOp::Max => x.max(y),
            BinaryOp::CmpLt => b(x < y),
            BinaryOp::CmpLe => b(x <= y),
            BinaryOp::CmpEq => b(x == y),
            BinaryOp::CmpNe => b(x != y),
            _ => 0,
        },
    }
}

/// Column-major `size`x`size` matrix inverse by Gauss-Jordan elimination.
/// Singular matrices produce all zeros.
fn invert(m: &[f32], size: usize) -> Vec<f32> {
    let at = |c: usize, r: usize| c * size + r;
    let mut a = m.to_vec();
    let mut inv = vec![0.0f32; size * size];
    for i in 0..size {
        inv[at(i, i)] = 1.0;
    }
    for col in 0..size {
        let Some(pivot) = (col..size).max_by(|x, y| a[at(col, *x)].abs().total_cmp(&a[at(col, *y)].abs())) else {
            return vec![0.0; size * size];
        };
        if a[at(col, pivot)] == 0.0 {
            return vec![0.0; size * size];
        }
        if pivot != col {
            for c in 0..size {
                a.swap(at(c, pivot), at(c, col));
                inv.swap(at(c, pivot), at(c, col));
            }
        }
        let scale = 1.0 / a[at(col, col)];
        for c in 0..size {
            a[at(c, col)] *= scale;
            inv[at(c, col)] *= scale;
        }
        for r in 0..size {
            if r == col {
                continue;
            }
            let factor = a[at(col, r)];
            if factor != 0.0 {
                for c in 0..size {
                    a[at(c, r)] -= factor * a[at(c, col)];
                    inv[at(c, r)] -= factor * inv[at(c, col)];
                }
            }
        }
    }
    inv
}

fn determinant(m: &[f32], size: usize) -> f32 {
    let at = |c: usize, r: usize| c * size + r;
    let mut a = m.to_vec();
    let mut det = 1.0f32;
    for col in 0..size {
        let Some(pivot) = (col..size).max_by(|x, y| a[at(col, *x)].abs().total_cmp(&a[at(col, *y)].abs())) else {
            return 0.0;
        };
        if a[at(col, pivot)] == 0.0 {
            return 0.0;
        }
        if pivot != col {
            for c in 0..size {
                a.swap(at(c, pivot), at(c, col));
            }
            det = -det;
        }
        det *= a[at(col, col)];
        for r in col + 1..size {
            let factor = a[at(col, r)] / a[at(col, col)];
            for c in col..size {
                a[at(c, r)] -= factor * a[at(c, col)];
            }
        }
    }
    det
}

impl<'a> Machine<'a> {
    fn idx(&self, slot: usize, lane: usize) -> usize {
        slot * self.lanes + lane
    }

    fn get(&self, slot: usize, lane: usize) -> u32 {
        self.values[self.idx(slot, lane)]
    }

    fn set(&mut self, slot: usize, lane: usize, value: u32) {
        let i = self.idx(slot, lane);
        self.values[i] = value;
    }

    fn read_space(&self, space: SlotSpace, slot: usize, lane: usize) -> u32 {
        match space {
            SlotSpace::Value => self.get(slot, lane),
            SlotSpace::Uniform => self.uniforms.get(slot).copied().unwrap_or(0),
            SlotSpace::Immutable => self.immutable.get(slot).copied().unwrap_or(0),
        }
    }

    fn exec(&self, lane: usize) -> bool {
        self.cond[lane] & self.loop_mask[lane] & self.ret[lane] != 0
    }

    fn check(&self, slot: usize, count: usize) -> Result<()> {
        if (slot + count) * self.lanes > self.values.len() {
            bail_pipeline!("slot range {}..{} is outside the value arena", slot, slot + count);
        }
        Ok(())
    }

    /// Clamps an indirect start so `count` slots starting there end by `limit`.
    fn indirect_start(&self, base: usize, offset_slot: usize, lane: usize, count: usize, limit: usize) -> usize {
        let offset = self.get(offset_slot, lane) as i32;
        let start = base as i64 + i64::from(offset.max(0));
        let last_start = limit.saturating_sub(count).max(base) as i64;
        start.min(last_start) as usize
    }

    /// Applies `op` to each lane's `width` consecutive slots at `base`.
    fn each_lane(&mut self, base: usize, width: usize, op: impl Fn(&[f32]) -> Vec<f32>) {
        for lane in 0..self.lanes {
            let input: Vec<f32> = (0..width).map(|i| f(self.get(base + i, lane))).collect();
            for (i, out) in op(&input).into_iter().enumerate() {
                self.set(base + i, lane, out.to_bits());
            }
        }
    }

    fn branch_taken(&self, kind: BranchKind) -> bool {
        let lanes = 0..self.active;
        match kind {
            BranchKind::Jump => true,
            BranchKind::IfAllLanesActive => lanes.clone().all(|l| self.exec(l)),
            BranchKind::IfAnyLanesActive => lanes.clone().any(|l| self.exec(l)),
            BranchKind::IfNoLanesActive => !lanes.clone().any(|l| self.exec(l)),
            BranchKind::IfNoActiveLanesEqual { slot, value } => {
                !lanes.clone().any(|l| self.exec(l) && self.get(slot, l) == value as u32)
            }
        }
    }

    fn record(&mut self, op: TraceOp, data: [i32; 2]) {
        if self.exec(0) {
            self.trace.push(TraceInfo { op, data });
        }
    }

    fn step(&mut self, stage: &Stage) -> Result<()> {
        let lanes = self.lanes;
        match stage {
            Stage::InitLaneMasks => {
                for l in 0..lanes {
                    let on = b(l < self.active);
                    self.cond[l] = on;
                    self.loop_mask[l] = on;
                    self.ret[l] = on;
                }
            }
            Stage::StoreSrcRg { dst } => {
                self.check(*dst, 2)?;
                for l in 0..lanes {
                    self.set(*dst, l, self.regs.src[0][l].to_bits());
                    self.set(dst + 1, l, self.regs.src[1][l].to_bits());
                }
            }
            Stage::StoreSrc { dst } | Stage::StoreDst { dst } => {
                self.check(*dst, 4)?;
                let from_src = matches!(stage, Stage::StoreSrc { .. });
                for c in 0..4 {
                    for l in 0..lanes {
                        let v = if from_src { self.regs.src[c][l] } else { self.regs.dst[c][l] };
                        self.set(dst + c, l, v.to_bits());
                    }
                }
            }
            Stage::StoreDeviceXY01 { dst } => {
                self.check(*dst, 4)?;
                for l in 0..lanes {
                    self.set(*dst, l, self.device[0][l].to_bits());
                    self.set(dst + 1, l, self.device[1][l].to_bits());
                    self.set(dst + 2, l, 0.0f32.to_bits());
                    self.set(dst + 3, l, 1.0f32.to_bits());
                }
            }
            Stage::LoadSrc { src } | Stage::LoadDst { src } => {
                self.check(*src, 4)?;
                let into_src = matches!(stage, Stage::LoadSrc { .. });
                for c in 0..4 {
                    for l in 0..lanes {
                        let v = f(self.get(src + c, l));
                        if into_src {
                            self.regs.src[c][l] = v;
                        } else {
                            self.regs.dst[c][l] = v;
                        }
                    }
                }
            }
            Stage::LoadSrcRg { src } => {
                for c in 0..2 {
                    for l in 0..lanes {
                        self.regs.src[c][l] = f(self.get(src + c, l));
                    }
                }
            }
            Stage::StoreConditionMask { dst } => {
                for l in 0..lanes {
                    self.set(*dst, l, self.cond[l]);
                }
            }
            Stage::LoadConditionMask { src } => {
                for l in 0..lanes {
                    self.cond[l] = self.get(*src, l);
                }
            }
            Stage::MergeConditionMask { src } => {
                for l in 0..lanes {
                    self.cond[l] = self.get(*src, l) & self.get(src + 1, l);
                }
            }
            Stage::MergeInvConditionMask { src } => {
                for l in 0..lanes {
                    self.cond[l] = self.get(*src, l) & !self.get(src + 1, l);
                }
            }
            Stage::StoreLoopMask { dst } => {
                for l in 0..lanes {
                    self.set(*dst, l, self.loop_mask[l]);
                }
            }
            Stage::LoadLoopMask { src } => {
                for l in 0..lanes {
                    self.loop_mask[l] = self.get(*src, l);
                }
            }
            Stage::MergeLoopMask { src } => {
                for l in 0..lanes {
                    self.loop_mask[l] &= self.get(*src, l);
                }
            }
            Stage::ReenableLoopMask { src } => {
                for l in 0..lanes {
                    self.loop_mask[l] |= self.get(*src, l);
                }
            }
            Stage::MaskOffLoopMask => {
                for l in 0..lanes {
                    if self.exec(l) {
                        self.loop_mask[l] = 0;
                    }
                }
            }
            Stage::StoreReturnMask { dst } => {
                for l in 0..lanes {
                    self.set(*dst, l, self.ret[l]);
                }
            }
            Stage::LoadReturnMask { src } => {
                for l in 0..lanes {
                    self.ret[l] = self.get(*src, l);
                }
            }
            Stage::MaskOffReturnMask => {
                for l in 0..lanes {
                    if self.exec(l) {
                        self.ret[l] = 0;
                    }
                }
            }
            Stage::ContinueOp { continue_mask } => {
                for l in 0..lanes {
                    if self.exec(l) {
                        self.set(*continue_mask, l, ALL_ONES);
                        self.loop_mask[l] = 0;
                    }
                }
            }
            Stage::CaseOp { base, value } => {
                for l in 0..lanes {
                    let matches = self.get(*base, l) as i32 == *value && self.get(base + 1, l) != 0;
                    if matches {
                        self.loop_mask[l] = ALL_ONES;
                        self.set(base + 1, l, 0);
                    }
                }
            }
            Stage::SplatConstant { dst, count, value } => {
                self.check(*dst, *count)?;
                for s in 0..*count {
                    for l in 0..lanes {
                        self.set(dst + s, l, *value);
                    }
                }
            }
            Stage::ZeroSlots { dst, count } => {
                self.check(*dst, *count)?;
                for s in 0..*count {
                    for l in 0..lanes {
                        self.set(dst + s, l, 0);
                    }
                }
            }
            Stage::CopySlots {
                dst,
                src,
                count,
                masked,
            } => {
                self.check(*dst, *count)?;
                self.check(*src, *count)?;
                for l in 0..lanes {
                    if *masked && !self.exec(l) {
                        continue;
                    }
                    for s in 0..*count {
                        let v = self.get(src + s, l);
                        self.set(dst + s, l, v);
                    }
                }
            }
            Stage::CopyUniform { dst, src, count } | Stage::CopyImmutable { dst, src, count } => {
                self.check(*dst, *count)?;
                let space = match stage {
                    Stage::CopyUniform { .. } => SlotSpace::Uniform,
                    _ => SlotSpace::Immutable,
                };
                for s in 0..*count {
                    let v = self.read_space(space, src + s, 0);
                    for l in 0..lanes {
                        self.set(dst + s, l, v);
                    }
                }
            }
            Stage::CopyFromIndirect {
                dst,
                src,
                count,
                offset,
                limit,
                space,
            } => {
                self.check(*dst, *count)?;
                for l in 0..lanes {
                    let start = self.indirect_start(*src, *offset, l, *count, *limit);
                    for s in 0..*count {
                        let v = self.read_space(*space, start + s, l);
                        self.set(dst + s, l, v);
                    }
                }
            }
            Stage::CopyToIndirectMasked {
                dst,
                src,
                count,
                offset,
                limit,
            } => {
                for l in 0..lanes {
                    if !self.exec(l) {
                        continue;
                    }
                    let start = self.indirect_start(*dst, *offset, l, *count, *limit);
                    for s in 0..*count {
                        let v = self.get(src + s, l);
                        self.set(start + s, l, v);
                    }
                }
            }
            Stage::SwizzleCopySlotsMasked { dst, src, components } => {
                for l in 0..lanes {
                    if !self.exec(l) {
                        continue;
                    }
                    for (i, c) in components.iter().enumerate() {
                        let v = self.get(src + i, l);
                        self.set(dst + *c as usize, l, v);
                    }
                }
            }
            Stage::SwizzleCopyToIndirectMasked {
                dst,
                src,
                components,
                offset,
                limit,
            } => {
                let span = components.iter().map(|c| *c as usize + 1).max().unwrap_or(1);
                for l in 0..lanes {
                    if !self.exec(l) {
                        continue;
                    }
                    let start = self.indirect_start(*dst, *offset, l, span, *limit);
                    for (i, c) in components.iter().enumerate() {
                        let v = self.get(src + i, l);
                        self.set(start + *c as usize, l, v);
                    }
                }
            }
            Stage::Swizzle {
                base,
                consumed,
                components,
            } => {
                self.check(*base, (*consumed).max(components.len()))?;
                for l in 0..lanes {
                    let input: Vec<u32> = (0..*consumed).map(|i| self.get(base + i, l)).collect();
                    for (i, c) in components.iter().enumerate() {
                        let v = input.get(*c as usize).copied().unwrap_or(0);
                        self.set(base + i, l, v);
                    }
                }
            }
            Stage::Transpose { base, columns, rows } => {
                let (columns, rows) = (*columns, *rows);
                self.each_lane(*base, columns * rows, |m| {
                    let mut out = vec![0.0; columns * rows];
                    for c in 0..columns {
                        for r in 0..rows {
                            out[r * columns + c] = m[c * rows + r];
                        }
                    }
                    out
                });
            }
            Stage::DiagonalMatrix { base, columns, rows } => {
                let (columns, rows) = (*columns, *rows);
                self.check(*base, columns * rows)?;
                self.each_lane(*base, 1, |x| {
                    (0..columns * rows)
                        .map(|i| if i / rows == i % rows { x[0] } else { 0.0 })
                        .collect()
                });
            }
            Stage::MatrixResize { base, from, to } => {
                let (from, to) = (*from, *to);
                self.check(*base, (to.0 * to.1).max(from.0 * from.1))?;
                self.each_lane(*base, from.0 * from.1, |m| {
                    let mut out = Vec::with_capacity(to.0 * to.1);
                    for c in 0..to.0 {
                        for r in 0..to.1 {
                            out.push(if c < from.0 && r < from.1 {
                                m[c * from.1 + r]
                            } else if c == r {
                                1.0
                            } else {
                                0.0
                            });
                        }
                    }
                    out
                });
            }
            Stage::MatrixMultiply { base, left, right } => {
                let (left, right) = (*left, *right);
                if left.0 != right.1 {
                    bail_pipeline!("matrix_multiply shapes {:?} and {:?} do not agree", left, right);
                }
                let width = left.0 * left.1 + right.0 * right.1;
                self.each_lane(*base, width, |m| {
                    let (l, r) = m.split_at(left.0 * left.1);
                    let mut out = Vec::with_capacity(right.0 * left.1);
                    for c in 0..right.0 {
                        for row in 0..left.1 {
                            let sum = (0..left.0).map(|k| l[k * left.1 + row] * r[c * right.1 + k]).sum();
                            out.push(sum);
                        }
                    }
                    out
                });
            }
            Stage::Inverse { base, size } => {
                let size = *size;
                self.each_lane(*base, size * size, |m| invert(m, size));
            }
            Stage::Determinant { base, size } => {
                let size = *size;
                self.each_lane(*base, size * size, |m| vec![determinant(m, size)]);
            }
            Stage::Dot { base, count } => {
                let count = *count;
                self.each_lane(*base, 2 * count, |m| {
                    vec![(0..count).map(|i| m[i] * m[count + i]).sum()]
                });
            }
            Stage::Refract4 { base } => {
                self.each_lane(*base, 9, |m| {
                    let (i, n, eta) = (&m[0..4], &m[4..8], m[8]);
                    let d: f32 = (0..4).map(|k| n[k] * i[k]).sum();
                    let k = 1.0 - eta * eta * (1.0 - d * d);
                    if k < 0.0 {
                        vec![0.0; 4]
                    } else {
                        (0..4).map(|c| eta * i[c] - (eta * d + k.sqrt()) * n[c]).collect()
                    }
                });
            }
            Stage::Unary { op, ty, dst, count } => {
                self.check(*dst, *count)?;
                for s in 0..*count {
                    for l in 0..lanes {
                        let v = unary(*op, *ty, self.get(dst + s, l));
                        self.set(dst + s, l, v);
                    }
                }
            }
            Stage::Binary {
                op,
                ty,
                dst,
                src,
                count,
            } => {
                self.check(*dst, *count)?;
                self.check(*src, *count)?;
                for s in 0..*count {
                    for l in 0..lanes {
                        let v = binary(*op, *ty, self.get(dst + s, l), self.get(src + s, l));
                        self.set(dst + s, l, v);
                    }
                }
            }
            Stage::BinaryImm {
                op,
                ty,
                dst,
                count,
                imm,
            } => {
                self.check(*dst, *count)?;
                for s in 0..*count {
                    for l in 0..lanes {
                        let v = binary(*op, *ty, self.get(dst + s, l), *imm);
                        self.set(dst + s, l, v);
                    }
                }
            }
            Stage::Ternary { op, ty, base, count } => {
                let n = *count;
                self.check(*base, 3 * n)?;
                for s in 0..n {
                    for l in 0..lanes {
                        let x = self.get(base + s, l);
                        let y = self.get(base + n + s, l);
                        let z = self.get(base + 2 * n + s, l);
                        let v = match (op, ty) {
                            (TernaryOp::Mix, NumType::Float) => (f(x) + (f(y) - f(x)) * f(z)).to_bits(),
                            (TernaryOp::Mix, _) => (z & y) | (!z & x),
                            (TernaryOp::Smoothstep, _) => {
                                let t = ((f(z) - f(x)) / (f(y) - f(x))).clamp(0.0, 1.0);
                                (t * t * (3.0 - 2.0 * t)).to_bits()
                            }
                        };
                        self.set(base + s, l, v);
                    }
                }
            }
            Stage::Select { dst, src, count } => {
                for l in 0..lanes {
                    if self.exec(l) {
                        for s in 0..*count {
                            let v = self.get(src + s, l);
                            self.set(dst + s, l, v);
                        }
                    }
                }
            }
            Stage::Host(host) => (host.run)(&mut self.regs),
            Stage::TraceLine { line } => self.record(TraceOp::Line, [*line, 0]),
            Stage::TraceVar { slot, count } => {
                for s in 0..*count {
                    let bits = self.get(slot + s, 0) as i32;
                    self.record(TraceOp::Var, [(slot + s) as i32, bits]);
                }
            }
            Stage::TraceEnter { function } => self.record(TraceOp::Enter, [*function, 0]),
            Stage::TraceExit { function } => self.record(TraceOp::Exit, [*function, 0]),
            Stage::TraceScope { delta } => self.record(TraceOp::Scope, [*delta, 0]),
            Stage::Branch { .. } | Stage::StackRewind | Stage::SetBasePointer => {}
        }
        Ok(())
    }
}

impl Interpreter {
    pub fn new(lane_count: usize) -> Interpreter {
        Interpreter {
            stages: Vec::new(),
            lane_count: lane_count.max(1),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Runs the stages over `pixels`, `lane_count` at a time. Returns the
    /// final `src` register of each pixel.
    pub fn run(&self, slots: &mut SlotData, pixels: &[Pixel]) -> Result<RunOutput> {
        if slots.lane_count != self.lane_count {
            bail_pipeline!(
                "slot data has {} lanes but the interpreter runs {}",
                slots.lane_count,
                self.lane_count
            );
        }
        let mut output = RunOutput::default();
        for batch in pixels.chunks(self.lane_count) {
            let (colors, trace) = self.run_batch(slots, batch)?;
            output.colors.extend(colors);
            if output.trace.is_empty() {
                output.trace = trace;
            }
        }
        Ok(output)
    }

    fn run_batch(&self, slots: &mut SlotData, batch: &[Pixel]) -> Result<(Vec<[f32; 4]>, Vec<TraceInfo>)> {
        let lanes = self.lane_count;
        let mut regs = ColorRegisters::default();
        for c in 0..4 {
            regs.src[c] = (0..lanes).map(|l| batch.get(l).map(|p| p.src[c]).unwrap_or(0.0)).collect();
            regs.dst[c] = (0..lanes).map(|l| batch.get(l).map(|p| p.dst[c]).unwrap_or(0.0)).collect();
        }
        let device = [
            (0..lanes).map(|l| batch.get(l).map(|p| p.device[0]).unwrap_or(0.0)).collect(),
            (0..lanes).map(|l| batch.get(l).map(|p| p.device[1]).unwrap_or(0.0)).collect(),
        ];
        let mut machine = Machine {
            lanes,
            active: batch.len(),
            values: &mut slots.values,
            immutable: &slots.immutable,
            uniforms: &slots.uniforms,
            regs,
            device,
            cond: vec![0; lanes],
            loop_mask: vec![0; lanes],
            ret: vec![0; lanes],
            trace: Vec::new(),
        };

        let mut pc = 0usize;
        let mut steps = 0usize;
        while pc < self.stages.len() {
            steps += 1;
            if steps > MAX_STEPS {
                bail_pipeline!("execution exceeded {} stages", MAX_STEPS);
            }
            let stage = &self.stages[pc];
            trace!("#{} {}", pc, stage.name());
            if let Stage::Branch { kind, offset } = stage {
                if machine.branch_taken(*kind) {
                    let target = pc as i64 + i64::from(*offset);
                    if target < 0 || target as usize > self.stages.len() {
                        bail_pipeline!("branch at #{} leaves the program (offset {})", pc, offset);
                    }
                    pc = target as usize;
                    continue;
                }
            } else {
                machine.step(stage)?;
            }
            pc += 1;
        }
        debug!("ran {} stages for {} lanes", steps, batch.len());

        let colors = (0..batch.len())
            .map(|l| {
                [
                    machine.regs.src[0][l],
                    machine.regs.src[1][l],
                    machine.regs.src[2][l],
                    machine.regs.src[3][l],
                ]
            })
            .collect();
        Ok((colors, machine.trace))
    }
}

/// Lowers `program` into a fresh interpreter and runs it over `pixels`.
pub fn evaluate(
    program: &Program,
    lane_count: usize,
    callbacks: Option<&mut dyn Callbacks>,
    uniforms: &[f32],
    pixels: &[Pixel],
) -> Result<RunOutput> {
    let mut interpreter = Interpreter::new(lane_count);
    let mut slots = program.allocate_slot_data(interpreter.lane_count());
    program.append_stages(&mut interpreter, &mut slots, callbacks, uniforms)?;
    interpreter.run(&mut slots, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rp::builder::{Builder, SlotRange};

    fn run(builder: Builder, value_slots: usize, pixels: &[Pixel]) -> Vec<[f32; 4]> {
        let program = builder.finish(value_slots, 0, 0, None).unwrap();
        evaluate(&program, 4, None, &[], pixels).unwrap().colors
    }

    #[test]
    fn test_constant_color() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut b = Builder::new();
        b.init_lane_masks();
        b.push_literal_f(0.25);
        b.push_literal_f(0.5);
        b.push_zeros(1);
        b.push_literal_f(1.0);
        b.pop_src_rgba();
        let colors = run(b, 0, &[Pixel::at(0.0, 0.0); 5]);
        assert_eq!(colors.len(), 5);
        assert!(colors.iter().all(|c| *c == [0.25, 0.5, 0.0, 1.0]));
    }

    #[test]
    fn test_masked_select_by_coordinate() {
        let _ = env_logger::builder().is_test(true).try_init();
        // src = x < 1 ? 1 : 0, written through the condition mask.
        let result = SlotRange::new(0, 1);
        let mut b = Builder::new();
        b.init_lane_masks();
        b.zero_slots_unmasked(result);
        b.enable_execution_mask_writes();
        b.push_condition_mask();
        b.push_src_rgba();
        b.swizzle(4, &[0]);
        b.push_literal_f(1.0);
        b.binary_op(BinaryOp::CmpLt, NumType::Float, 1);
        b.merge_condition_mask();
        b.push_literal_f(1.0);
        b.pop_slots(result);
        b.discard_stack(1);
        b.pop_condition_mask();
        b.disable_execution_mask_writes();
        b.push_slots(result);
        b.push_duplicates(3);
        b.pop_src_rgba();
        let colors = run(b, 1, &[Pixel::at(0.5, 0.0), Pixel::at(1.5, 0.0)]);
        assert_eq!(colors[0], [1.0; 4]);
        assert_eq!(colors[1], [0.0; 4]);
    }

    #[test]
    fn test_matrix_helpers() {
        let m = [4.0, 0.0, 0.0, 2.0];
        assert_eq!(invert(&m, 2), vec![0.25, 0.0, 0.0, 0.5]);
        assert_eq!(determinant(&m, 2), 8.0);
        assert_eq!(invert(&[0.0; 4], 2), vec![0.0; 4]);
        let m3 = [2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 4.0];
        assert_eq!(determinant(&m3, 3), 24.0);
    }

    #[test]
    fn test_int_division_by_zero_is_zero() {
        assert_eq!(binary(BinaryOp::Div, NumType::Int, 7, 0), 0);
        assert_eq!(binary(BinaryOp::Div, NumType::Int, (-7i32) as u32, 2), (-3i32) as u32);
        assert_eq!(binary(BinaryOp::Mod, NumType::Float, 5.5f32.to_bits(), 2.0f32.to_bits()), 1.5f32.to_bits());
    }

    #[test]
    fn test_step_limit() {
        let mut b = Builder::new();
        let top = b.next_label_id();
        b.init_lane_masks();
        b.label(top);
        b.branch_if_any_lanes_active(top);
        let program = b.finish(0, 0, 0, None).unwrap();
        let err = evaluate(&program, 1, None, &[], &[Pixel::default()]).unwrap_err();
        assert!(err.to_string().contains("exceeded"), "{}", err);
    }
}
