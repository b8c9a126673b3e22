use crate::lexer::TokenKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    LogicalNot,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    BitwiseNot,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Eq,
    EqEq,
    Neq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    ShlEq,
    ShrEq,
    BitwiseAndEq,
    BitwiseOrEq,
    BitwiseXorEq,
    PlusPlus,
    MinusMinus,
    Comma,
}

/// Binding strength, tightest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Parentheses = 1,
    Postfix = 2,
    Prefix = 3,
    Multiplicative = 4,
    Additive = 5,
    Shift = 6,
    Relational = 7,
    Equality = 8,
    BitwiseAnd = 9,
    BitwiseXor = 10,
    BitwiseOr = 11,
    LogicalAnd = 12,
    LogicalXor = 13,
    LogicalOr = 14,
    Ternary = 15,
    Assignment = 16,
    Sequence = 17,
    TopLevel = 18,
}

impl Operator {
    pub fn from_token(kind: TokenKind) -> Option<Operator> {
        let op = match kind {
            TokenKind::Plus => Operator::Plus,
            TokenKind::Minus => Operator::Minus,
            TokenKind::Star => Operator::Star,
            TokenKind::Slash => Operator::Slash,
            TokenKind::Percent => Operator::Percent,
            TokenKind::Shl => Operator::Shl,
            TokenKind::Shr => Operator::Shr,
            TokenKind::LogicalNot => Operator::LogicalNot,
            TokenKind::LogicalAnd => Operator::LogicalAnd,
            TokenKind::LogicalOr => Operator::LogicalOr,
            TokenKind::LogicalXor => Operator::LogicalXor,
            TokenKind::BitwiseNot => Operator::BitwiseNot,
            TokenKind::BitwiseAnd => Operator::BitwiseAnd,
            TokenKind::BitwiseOr => Operator::BitwiseOr,
            TokenKind::BitwiseXor => Operator::BitwiseXor,
            TokenKind::Eq => Operator::Eq,
            TokenKind::EqEq => Operator::EqEq,
            TokenKind::Neq => Operator::Neq,
            TokenKind::Lt => Operator::Lt,
            TokenKind::Gt => Operator::Gt,
            TokenKind::LtEq => Operator::LtEq,
            TokenKind::GtEq => Operator::GtEq,
            TokenKind::PlusEq => Operator::PlusEq,
            TokenKind::MinusEq => Operator::MinusEq,
            TokenKind::StarEq => Operator::StarEq,
            TokenKind::SlashEq => Operator::SlashEq,
            TokenKind::PercentEq => Operator::PercentEq,
            TokenKind::ShlEq => Operator::ShlEq,
            TokenKind::ShrEq => Operator::ShrEq,
            TokenKind::BitwiseAndEq => Operator::BitwiseAndEq,
            TokenKind::BitwiseOrEq => Operator::BitwiseOrEq,
            TokenKind::BitwiseXorEq => Operator::BitwiseXorEq,
            TokenKind::PlusPlus => Operator::PlusPlus,
            TokenKind::MinusMinus => Operator::MinusMinus,
            TokenKind::Comma => Operator::Comma,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::Shl => "<<",
            Operator::Shr => ">>",
            Operator::LogicalNot => "!",
            Operator::LogicalAnd => "&&",
            Operator::LogicalOr => "||",
            Operator::LogicalXor => "^^",
            Operator::BitwiseNot => "~",
            Operator::BitwiseAnd => "&",
            Operator::BitwiseOr => "|",
            Operator::BitwiseXor => "^",
            Operator::Eq => "=",
            Operator::EqEq => "==",
            Operator::Neq => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::LtEq => "<=",
            Operator::GtEq => ">=",
            Operator::PlusEq => "+=",
            Operator::MinusEq => "-=",
            Operator::StarEq => "*=",
            Operator::SlashEq => "/=",
            Operator::PercentEq => "%=",
            Operator::ShlEq => "<<=",
            Operator::ShrEq => ">>=",
            Operator::BitwiseAndEq => "&=",
            Operator::BitwiseOrEq => "|=",
            Operator::BitwiseXorEq => "^=",
            Operator::PlusPlus => "++",
            Operator::MinusMinus => "--",
            Operator::Comma => ",",
        }
    }

    /// True for `=` and every compound assignment.
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::PlusEq
                | Operator::MinusEq
                | Operator::StarEq
                | Operator::SlashEq
                | Operator::PercentEq
                | Operator::ShlEq
                | Operator::ShrEq
                | Operator::BitwiseAndEq
                | Operator::BitwiseOrEq
                | Operator::BitwiseXorEq
        )
    }

    /// `+=` becomes `+`; other operators are returned unchanged.
    pub fn remove_assignment(self) -> Operator {
        match self {
            Operator::PlusEq => Operator::Plus,
            Operator::MinusEq => Operator::Minus,
            Operator::StarEq => Operator::Star,
            Operator::SlashEq => Operator::Slash,
            Operator::PercentEq => Operator::Percent,
            Operator::ShlEq => Operator::Shl,
            Operator::ShrEq => Operator::Shr,
            Operator::BitwiseAndEq => Operator::BitwiseAnd,
            Operator::BitwiseOrEq => Operator::BitwiseOr,
            Operator::BitwiseXorEq => Operator::BitwiseXor,
            op => op,
        }
    }

    pub fn is_compound_assignment(self) -> bool {
        self.is_assignment() && self != Operator::Eq
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Operator::EqEq | Operator::Neq)
    }

    pub fn is_relational(self) -> bool {
        matches!(self, Operator::Lt | Operator::Gt | Operator::LtEq | Operator::GtEq)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Operator::LogicalAnd | Operator::LogicalOr | Operator::LogicalXor)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            Operator::BitwiseAnd | Operator::BitwiseOr | Operator::BitwiseXor | Operator::Shl | Operator::Shr
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Operator::Plus | Operator::Minus | Operator::Star | Operator::Slash | Operator::Percent
        )
    }

    /// `a op b == b op a` for every operand pair of a legal type.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Operator::Plus
                | Operator::Star
                | Operator::BitwiseAnd
                | Operator::BitwiseOr
                | Operator::BitwiseXor
                | Operator::LogicalXor
                | Operator::EqEq
                | Operator::Neq
        )
    }

    pub fn precedence(self) -> Precedence {
        match self {
            Operator::Star | Operator::Slash | Operator::Percent => Precedence::Multiplicative,
            Operator::Plus | Operator::Minus => Precedence::Additive,
            Operator::Shl | Operator::Shr => Precedence::Shift,
            Operator::Lt | Operator::Gt | Operator::LtEq | Operator::GtEq => Precedence::Relational,
            Operator::EqEq | Operator::Neq => Precedence::Equality,
            Operator::BitwiseAnd => Precedence::BitwiseAnd,
            Operator::BitwiseXor => Precedence::BitwiseXor,
            Operator::BitwiseOr => Precedence::BitwiseOr,
            Operator::LogicalAnd => Precedence::LogicalAnd,
            Operator::LogicalXor => Precedence::LogicalXor,
            Operator::LogicalOr => Precedence::LogicalOr,
            Operator::Comma => Precedence::Sequence,
            Operator::LogicalNot | Operator::BitwiseNot | Operator::PlusPlus | Operator::MinusMinus => {
                Precedence::Prefix
            }
            _ => Precedence::Assignment,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
