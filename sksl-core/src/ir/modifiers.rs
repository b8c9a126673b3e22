use crate::position::Position;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Storage and qualifier keywords attached to a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModifierFlags(u32);

impl ModifierFlags {
    pub const NONE: ModifierFlags = ModifierFlags(0);
    pub const UNIFORM: ModifierFlags = ModifierFlags(1 << 0);
    pub const CONST: ModifierFlags = ModifierFlags(1 << 1);
    pub const IN: ModifierFlags = ModifierFlags(1 << 2);
    pub const OUT: ModifierFlags = ModifierFlags(1 << 3);
    pub const FLAT: ModifierFlags = ModifierFlags(1 << 4);
    pub const NOPERSPECTIVE: ModifierFlags = ModifierFlags(1 << 5);
    pub const INLINE: ModifierFlags = ModifierFlags(1 << 6);
    pub const NOINLINE: ModifierFlags = ModifierFlags(1 << 7);
    pub const PURE: ModifierFlags = ModifierFlags(1 << 8);
    pub const WORKGROUP: ModifierFlags = ModifierFlags(1 << 9);
    pub const READONLY: ModifierFlags = ModifierFlags(1 << 10);
    pub const WRITEONLY: ModifierFlags = ModifierFlags(1 << 11);
    pub const BUFFER: ModifierFlags = ModifierFlags(1 << 12);
    pub const HIGHP: ModifierFlags = ModifierFlags(1 << 13);
    pub const MEDIUMP: ModifierFlags = ModifierFlags(1 << 14);
    pub const LOWP: ModifierFlags = ModifierFlags(1 << 15);

    const NAMES: [(ModifierFlags, &'static str); 16] = [
        (Self::UNIFORM, "uniform"),
        (Self::CONST, "const"),
        (Self::IN, "in"),
        (Self::OUT, "out"),
        (Self::FLAT, "flat"),
        (Self::NOPERSPECTIVE, "noperspective"),
        (Self::INLINE, "inline"),
        (Self::NOINLINE, "noinline"),
        (Self::PURE, "$pure"),
        (Self::WORKGROUP, "workgroup"),
        (Self::READONLY, "readonly"),
        (Self::WRITEONLY, "writeonly"),
        (Self::BUFFER, "buffer"),
        (Self::HIGHP, "highp"),
        (Self::MEDIUMP, "mediump"),
        (Self::LOWP, "lowp"),
    ];

    pub fn contains(self, other: ModifierFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn intersects(self, other: ModifierFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn remove(&mut self, other: ModifierFlags) {
        self.0 &= !other.0;
    }

    /// Keyword spelling of each set flag, in declaration order. `in out`
    /// renders as `inout`.
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let inout = self.contains(Self::IN | Self::OUT);
        for (flag, name) in Self::NAMES {
            if inout && (flag == Self::IN || flag == Self::OUT) {
                if flag == Self::IN {
                    names.push("inout");
                }
                continue;
            }
            if self.contains(flag) {
                names.push(name);
            }
        }
        names
    }
}

impl BitOr for ModifierFlags {
    type Output = ModifierFlags;

    fn bitor(self, rhs: ModifierFlags) -> ModifierFlags {
        ModifierFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModifierFlags {
    fn bitor_assign(&mut self, rhs: ModifierFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ModifierFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(" "))
    }
}

/// Flag-style layout keys (no `= value`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutFlag {
    OriginUpperLeft,
    BlendSupportAllEquations,
    PushConstant,
    Color,
}

impl LayoutFlag {
    pub fn name(self) -> &'static str {
        match self {
            LayoutFlag::OriginUpperLeft => "origin_upper_left",
            LayoutFlag::BlendSupportAllEquations => "blend_support_all_equations",
            LayoutFlag::PushConstant => "push_constant",
            LayoutFlag::Color => "color",
        }
    }
}

/// Integer-valued layout keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutKey {
    Location,
    Offset,
    Binding,
    Index,
    Set,
    Builtin,
    InputAttachmentIndex,
}

impl LayoutKey {
    pub fn name(self) -> &'static str {
        match self {
            LayoutKey::Location => "location",
            LayoutKey::Offset => "offset",
            LayoutKey::Binding => "binding",
            LayoutKey::Index => "index",
            LayoutKey::Set => "set",
            LayoutKey::Builtin => "builtin",
            LayoutKey::InputAttachmentIndex => "input_attachment_index",
        }
    }
}

pub enum LayoutQualifier {
    Flag(LayoutFlag),
    Value(LayoutKey),
}

pub fn layout_qualifier(name: &str) -> Option<LayoutQualifier> {
    let q = match name {
        "location" => LayoutQualifier::Value(LayoutKey::Location),
        "offset" => LayoutQualifier::Value(LayoutKey::Offset),
        "binding" => LayoutQualifier::Value(LayoutKey::Binding),
        "index" => LayoutQualifier::Value(LayoutKey::Index),
        "set" => LayoutQualifier::Value(LayoutKey::Set),
        "builtin" => LayoutQualifier::Value(LayoutKey::Builtin),
        "input_attachment_index" => LayoutQualifier::Value(LayoutKey::InputAttachmentIndex),
        "origin_upper_left" => LayoutQualifier::Flag(LayoutFlag::OriginUpperLeft),
        "blend_support_all_equations" => LayoutQualifier::Flag(LayoutFlag::BlendSupportAllEquations),
        "push_constant" => LayoutQualifier::Flag(LayoutFlag::PushConstant),
        "color" => LayoutQualifier::Flag(LayoutFlag::Color),
        _ => return None,
    };
    Some(q)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Layout {
    pub flags: Vec<LayoutFlag>,
    pub values: Vec<(LayoutKey, i32)>,
}

impl Layout {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.values.is_empty()
    }

    pub fn has_flag(&self, flag: LayoutFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn get(&self, key: LayoutKey) -> Option<i32> {
        self.values.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn builtin(&self) -> Option<i32> {
        self.get(LayoutKey::Builtin)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts: Vec<String> = self.values.iter().map(|(k, v)| format!("{} = {}", k.name(), v)).collect();
        parts.extend(self.flags.iter().map(|flag| flag.name().to_string()));
        write!(f, "layout ({}) ", parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub layout: Layout,
    pub flags: ModifierFlags,
    pub position: Position,
}

impl Modifiers {
    pub fn new(flags: ModifierFlags) -> Self {
        Modifiers {
            flags,
            ..Default::default()
        }
    }

    pub fn is_const(&self) -> bool {
        self.flags.contains(ModifierFlags::CONST)
    }

    pub fn is_uniform(&self) -> bool {
        self.flags.contains(ModifierFlags::UNIFORM)
    }

    pub fn is_out(&self) -> bool {
        self.flags.contains(ModifierFlags::OUT)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.layout)?;
        for name in self.flags.names() {
            write!(f, "{} ", name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_names() {
        let flags = ModifierFlags::UNIFORM | ModifierFlags::IN | ModifierFlags::OUT;
        assert_eq!(flags.names(), vec!["uniform", "inout"]);
        assert_eq!(ModifierFlags::CONST.to_string(), "const");
    }

    #[test]
    fn test_modifier_display() {
        let mut m = Modifiers::new(ModifierFlags::UNIFORM);
        m.layout.values.push((LayoutKey::Binding, 2));
        m.layout.flags.push(LayoutFlag::Color);
        assert_eq!(m.to_string(), "layout (binding = 2, color) uniform ");
    }
}
