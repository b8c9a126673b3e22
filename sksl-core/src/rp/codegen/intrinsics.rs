use super::expressions::num_type;
use super::Generator;
use crate::bail_unsupported;
use crate::error::Result;
use crate::ir::{Expression, IntrinsicKind};
use crate::rp::builder::{BinaryOp, NumType, TernaryOp, UnaryOp};

const ONE: u32 = 0x3F80_0000;
const MINUS_ONE: u32 = 0xBF80_0000;
const TWO: u32 = 0x4000_0000;

impl<'a> Generator<'a> {
    pub(super) fn push_intrinsic(&mut self, kind: IntrinsicKind, call: &Expression, args: &[Expression]) -> Result<()> {
        use IntrinsicKind::*;
        let Some(first) = args.first() else {
            bail_unsupported!("intrinsic call without arguments");
        };
        let n = first.ty.slot_count();
        let ty = num_type(&first.ty)?;
        match (kind, args) {
            (Abs, [x]) => self.push_unary(UnaryOp::Abs, ty, x),
            (Floor, [x]) => self.push_unary(UnaryOp::Floor, ty, x),
            (Ceil, [x]) => self.push_unary(UnaryOp::Ceil, ty, x),
            (Sqrt, [x]) => self.push_unary(UnaryOp::Sqrt, ty, x),
            (Inversesqrt, [x]) => self.push_unary(UnaryOp::Invsqrt, ty, x),
            (Exp, [x]) => self.push_unary(UnaryOp::Exp, ty, x),
            (Exp2, [x]) => self.push_unary(UnaryOp::Exp2, ty, x),
            (Log, [x]) => self.push_unary(UnaryOp::Log, ty, x),
            (Log2, [x]) => self.push_unary(UnaryOp::Log2, ty, x),
            (Sin, [x]) => self.push_unary(UnaryOp::Sin, ty, x),
            (Cos, [x]) => self.push_unary(UnaryOp::Cos, ty, x),
            (Tan, [x]) => self.push_unary(UnaryOp::Tan, ty, x),
            (Asin, [x]) => self.push_unary(UnaryOp::Asin, ty, x),
            (Acos, [x]) => self.push_unary(UnaryOp::Acos, ty, x),
            (Atan, [x]) => self.push_unary(UnaryOp::Atan, ty, x),
            (Atan, [y, x]) => self.push_binary_intrinsic(BinaryOp::Atan2, ty, y, x, n),
            (Pow, [x, y]) => self.push_binary_intrinsic(BinaryOp::Pow, ty, x, y, n),
            (Mod, [x, y]) => self.push_binary_intrinsic(BinaryOp::Mod, ty, x, y, n),
            (Min, [x, y]) => self.push_binary_intrinsic(BinaryOp::Min, ty, x, y, n),
            (Max, [x, y]) => self.push_binary_intrinsic(BinaryOp::Max, ty, x, y, n),
            (Sign, [x]) => {
                self.push_expression(x)?;
                if ty == NumType::Float {
                    self.builder.push_constant_bits(f32::MAX.to_bits(), n);
                    self.builder.binary_op(BinaryOp::Mul, ty, n);
                    self.builder.push_constant_bits(MINUS_ONE, n);
                    self.builder.binary_op(BinaryOp::Max, ty, n);
                    self.builder.push_constant_bits(ONE, n);
                } else {
                    self.builder.push_constant_bits(-1i32 as u32, n);
                    self.builder.binary_op(BinaryOp::Max, ty, n);
                    self.builder.push_constant_bits(1, n);
                }
                self.builder.binary_op(BinaryOp::Min, ty, n);
                Ok(())
            }
            (Fract, [x]) => {
                self.push_expression(x)?;
                self.builder.push_clone(n, n);
                self.builder.unary_op(UnaryOp::Floor, ty, n);
                self.builder.binary_op(BinaryOp::Sub, ty, n);
                Ok(())
            }
            (Clamp, [x, lo, hi]) => {
                self.push_expression(x)?;
                self.push_splatted(lo, n)?;
                self.builder.binary_op(BinaryOp::Max, ty, n);
                self.push_splatted(hi, n)?;
                self.builder.binary_op(BinaryOp::Min, ty, n);
                Ok(())
            }
            (Saturate, [x]) => {
                self.push_expression(x)?;
                self.builder.push_zeros(n);
                self.builder.binary_op(BinaryOp::Max, ty, n);
                self.builder.push_constant_bits(ONE, n);
                self.builder.binary_op(BinaryOp::Min, ty, n);
                Ok(())
            }
            (Mix, [x, y, a]) => {
                self.push_expression(x)?;
                self.push_expression(y)?;
                self.push_splatted(a, n)?;
                let mix_ty = if a.ty.is_boolean() { NumType::Int } else { NumType::Float };
                self.builder.ternary_op(TernaryOp::Mix, mix_ty, n);
                Ok(())
            }
            (Step, [edge, x]) => {
                let n = call.ty.slot_count();
                self.push_splatted(edge, n)?;
                self.push_splatted(x, n)?;
                self.builder.binary_op(BinaryOp::CmpLe, NumType::Float, n);
                self.builder.push_constant_bits(ONE, n);
                self.builder.binary_op(BinaryOp::BitwiseAnd, NumType::Int, n);
                Ok(())
            }
            (Smoothstep, [edge0, edge1, x]) => {
                let n = call.ty.slot_count();
                self.push_splatted(edge0, n)?;
                self.push_splatted(edge1, n)?;
                self.push_splatted(x, n)?;
                self.builder.ternary_op(TernaryOp::Smoothstep, NumType::Float, n);
                Ok(())
            }
            (Radians, [x]) => self.push_scaled(x, std::f32::consts::PI / 180.0),
            (Degrees, [x]) => self.push_scaled(x, 180.0 / std::f32::consts::PI),
            (Length, [x]) => {
                self.push_expression(x)?;
                self.length_of_top(n);
                Ok(())
            }
            (Distance, [a, b]) => {
                self.push_expression(a)?;
                self.push_expression(b)?;
                self.builder.binary_op(BinaryOp::Sub, ty, n);
                self.length_of_top(n);
                Ok(())
            }
            (Dot, [a, b]) => {
                self.push_expression(a)?;
                self.push_expression(b)?;
                self.dot_of_top(n);
                Ok(())
            }
            (Cross, [a, b]) => self.push_cross(a, b),
            (Normalize, [x]) => {
                self.push_expression(x)?;
                self.builder.push_clone(n, n);
                self.builder.push_clone(n, n);
                self.dot_of_top(n);
                self.builder.unary_op(UnaryOp::Invsqrt, NumType::Float, 1);
                self.builder.push_duplicates(n - 1);
                self.builder.binary_op(BinaryOp::Mul, NumType::Float, n);
                Ok(())
            }
            (Reflect, [i, normal]) => {
                // I - 2 * dot(N, I) * N
                self.push_expression(i)?;
                self.push_expression(normal)?;
                self.builder.push_clone(n, 2 * n);
                self.builder.push_clone(n, 2 * n);
                self.dot_of_top(n);
                self.builder.push_constant_bits(TWO, 1);
                self.builder.binary_op(BinaryOp::Mul, NumType::Float, 1);
                self.builder.push_duplicates(n - 1);
                self.builder.binary_op(BinaryOp::Mul, NumType::Float, n);
                self.builder.binary_op(BinaryOp::Sub, NumType::Float, n);
                Ok(())
            }
            (Refract, [i, normal, eta]) => {
                if n > 4 {
                    bail_unsupported!("refract of more than four components");
                }
                self.push_expression(i)?;
                self.builder.push_zeros(4 - n);
                self.push_expression(normal)?;
                self.builder.push_zeros(4 - n);
                self.push_expression(eta)?;
                self.builder.refract4();
                self.builder.discard_stack(4 - n);
                Ok(())
            }
            (Faceforward, [normal, i, reference]) => {
                // dot(Nref, I) < 0 ? N : -N
                self.push_expression(normal)?;
                self.builder.push_clone(n, n);
                self.negate(&normal.ty, n)?;
                self.builder.push_zeros(1);
                self.push_expression(i)?;
                self.push_expression(reference)?;
                self.dot_of_top(n);
                self.builder.binary_op(BinaryOp::CmpLe, NumType::Float, 1);
                self.builder.push_duplicates(n - 1);
                self.builder.ternary_op(TernaryOp::Mix, NumType::Int, n);
                Ok(())
            }
            (MatrixCompMult, [a, b]) => self.push_binary_intrinsic(BinaryOp::Mul, ty, a, b, n),
            (Transpose, [m]) => {
                self.push_expression(m)?;
                self.builder.transpose(m.ty.columns(), m.ty.rows());
                Ok(())
            }
            (Determinant, [m]) => {
                self.push_expression(m)?;
                self.builder.determinant(m.ty.columns());
                Ok(())
            }
            (Inverse, [m]) => {
                self.push_expression(m)?;
                self.builder.inverse_matrix(m.ty.columns());
                Ok(())
            }
            (LessThan, [a, b]) => self.push_binary_intrinsic(BinaryOp::CmpLt, ty, a, b, n),
            (LessThanEqual, [a, b]) => self.push_binary_intrinsic(BinaryOp::CmpLe, ty, a, b, n),
            (GreaterThan, [a, b]) => self.push_binary_intrinsic(BinaryOp::CmpLt, ty, b, a, n),
            (GreaterThanEqual, [a, b]) => self.push_binary_intrinsic(BinaryOp::CmpLe, ty, b, a, n),
            (Equal, [a, b]) => self.push_binary_intrinsic(BinaryOp::CmpEq, ty, a, b, n),
            (NotEqual, [a, b]) => self.push_binary_intrinsic(BinaryOp::CmpNe, ty, a, b, n),
            (Any, [x]) => {
                self.push_expression(x)?;
                self.fold_booleans(n, BinaryOp::BitwiseOr);
                Ok(())
            }
            (All, [x]) => {
                self.push_expression(x)?;
                self.fold_booleans(n, BinaryOp::BitwiseAnd);
                Ok(())
            }
            (Not, [x]) => {
                self.push_expression(x)?;
                self.builder.push_constant_bits(!0, n);
                self.builder.binary_op(BinaryOp::BitwiseXor, NumType::Int, n);
                Ok(())
            }
            (ToLinearSrgb | FromLinearSrgb, [color]) => {
                self.push_expression(color)?;
                self.builder.push_constant_bits(ONE, 1);
                self.builder.pop_src_rgba();
                if kind == ToLinearSrgb {
                    self.builder.invoke_to_linear_srgb();
                } else {
                    self.builder.invoke_from_linear_srgb();
                }
                self.builder.push_src_rgba();
                self.builder.discard_stack(1);
                Ok(())
            }
            _ => bail_unsupported!("unsupported intrinsic call '{}'", call.description()),
        }
    }

    fn push_unary(&mut self, op: UnaryOp, ty: NumType, x: &Expression) -> Result<()> {
        self.push_expression(x)?;
        self.builder.unary_op(op, ty, x.ty.slot_count());
        Ok(())
    }

    fn push_binary_intrinsic(
        &mut self,
        op: BinaryOp,
        ty: NumType,
        a: &Expression,
        b: &Expression,
        n: usize,
    ) -> Result<()> {
        self.push_expression(a)?;
        self.push_splatted(b, n)?;
        self.builder.binary_op(op, ty, n);
        Ok(())
    }

    fn push_scaled(&mut self, x: &Expression, factor: f32) -> Result<()> {
        let n = x.ty.slot_count();
        self.push_expression(x)?;
        self.builder.push_constant_bits(factor.to_bits(), n);
        self.builder.binary_op(BinaryOp::Mul, NumType::Float, n);
        Ok(())
    }

    /// Replaces two `n`-slot vectors on the stack with their dot product.
    fn dot_of_top(&mut self, n: usize) {
        if n == 1 {
            self.builder.binary_op(BinaryOp::Mul, NumType::Float, 1);
        } else {
            self.builder.dot(n);
        }
    }

    fn length_of_top(&mut self, n: usize) {
        if n == 1 {
            self.builder.unary_op(UnaryOp::Abs, NumType::Float, 1);
            return;
        }
        self.builder.push_clone(n, n);
        self.builder.dot(n);
        self.builder.unary_op(UnaryOp::Sqrt, NumType::Float, 1);
    }

    fn push_cross(&mut self, a: &Expression, b: &Expression) -> Result<()> {
        // a.yzx * b.zxy - a.zxy * b.yzx
        self.push_expression(a)?;
        self.push_expression(b)?;
        self.builder.push_clone(3, 6);
        self.builder.swizzle(3, &[1, 2, 0]);
        self.builder.push_clone(3, 6);
        self.builder.swizzle(3, &[2, 0, 1]);
        self.builder.binary_op(BinaryOp::Mul, NumType::Float, 3);
        self.builder.push_clone(3, 9);
        self.builder.swizzle(3, &[2, 0, 1]);
        self.builder.push_clone(3, 9);
        self.builder.swizzle(3, &[1, 2, 0]);
        self.builder.binary_op(BinaryOp::Mul, NumType::Float, 3);
        self.builder.binary_op(BinaryOp::Sub, NumType::Float, 3);
        self.builder.swizzle(9, &[6, 7, 8]);
        Ok(())
    }
}
