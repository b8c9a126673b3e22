/// Built-in functions that the raster-pipeline backend lowers to primitive
/// ops instead of calling a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicKind {
    Abs,
    Sign,
    Floor,
    Ceil,
    Fract,
    Mod,
    Min,
    Max,
    Clamp,
    Saturate,
    Mix,
    Step,
    Smoothstep,
    Sqrt,
    Inversesqrt,
    Pow,
    Exp,
    Exp2,
    Log,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Radians,
    Degrees,
    Length,
    Distance,
    Dot,
    Cross,
    Normalize,
    Reflect,
    Refract,
    Faceforward,
    MatrixCompMult,
    Transpose,
    Determinant,
    Inverse,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Equal,
    NotEqual,
    Any,
    All,
    Not,
    ToLinearSrgb,
    FromLinearSrgb,
}

impl IntrinsicKind {
    pub fn from_name(name: &str) -> Option<IntrinsicKind> {
        use IntrinsicKind::*;
        let kind = match name {
            "abs" => Abs,
            "sign" => Sign,
            "floor" => Floor,
            "ceil" => Ceil,
            "fract" => Fract,
            "mod" => Mod,
            "min" => Min,
            "max" => Max,
            "clamp" => Clamp,
            "saturate" => Saturate,
            "mix" => Mix,
            "step" => Step,
            "smoothstep" => Smoothstep,
            "sqrt" => Sqrt,
            "inversesqrt" => Inversesqrt,
            "pow" => Pow,
            "exp" => Exp,
            "exp2" => Exp2,
            "log" => Log,
            "log2" => Log2,
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "asin" => Asin,
            "acos" => Acos,
            "atan" => Atan,
            "radians" => Radians,
            "degrees" => Degrees,
            "length" => Length,
            "distance" => Distance,
            "dot" => Dot,
            "cross" => Cross,
            "normalize" => Normalize,
            "reflect" => Reflect,
            "refract" => Refract,
            "faceforward" => Faceforward,
            "matrixCompMult" => MatrixCompMult,
            "transpose" => Transpose,
            "determinant" => Determinant,
            "inverse" => Inverse,
            "lessThan" => LessThan,
            "lessThanEqual" => LessThanEqual,
            "greaterThan" => GreaterThan,
            "greaterThanEqual" => GreaterThanEqual,
            "equal" => Equal,
            "notEqual" => NotEqual,
            "any" => Any,
            "all" => All,
            "not" => Not,
            "toLinearSrgb" => ToLinearSrgb,
            "fromLinearSrgb" => FromLinearSrgb,
            _ => return None,
        };
        Some(kind)
    }

    /// Intrinsics whose result depends only on their arguments.
    pub fn is_pure(self) -> bool {
        !matches!(self, IntrinsicKind::ToLinearSrgb | IntrinsicKind::FromLinearSrgb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(IntrinsicKind::from_name("matrixCompMult"), Some(IntrinsicKind::MatrixCompMult));
        assert_eq!(IntrinsicKind::from_name("inversesqrt"), Some(IntrinsicKind::Inversesqrt));
        assert_eq!(IntrinsicKind::from_name("main"), None);
    }
}
