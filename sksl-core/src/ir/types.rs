//! The type system: scalars, vectors, matrices, arrays, structs, child-effect
//! handles and the generic placeholder types used by built-in declarations.

use super::modifiers::Modifiers;
use crate::position::Position;
use std::fmt;
use std::sync::{Arc, OnceLock};

pub type TypeRef = Arc<Type>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberKind {
    Float,
    Signed,
    Unsigned,
    Boolean,
    Nonnumeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Shader,
    ColorFilter,
    Blender,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
    pub modifiers: Modifiers,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Void,
    Scalar(NumberKind),
    Vector {
        component: TypeRef,
        columns: u8,
    },
    Matrix {
        component: TypeRef,
        columns: u8,
        rows: u8,
    },
    /// `count` is `None` for an unsized array.
    Array {
        element: TypeRef,
        count: Option<u32>,
    },
    Struct {
        fields: Vec<Field>,
        interface_block: bool,
    },
    Effect(EffectKind),
    /// A placeholder such as `$genType` that matches any of its members.
    Generic(Vec<TypeRef>),
    Poison,
}

#[derive(Debug, Clone)]
pub struct Type {
    pub name: String,
    pub kind: TypeKind,
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Type {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> TypeRef {
        Arc::new(Type {
            name: name.into(),
            kind,
        })
    }

    pub fn new_array(element: &TypeRef, count: Option<u32>) -> TypeRef {
        let name = match count {
            Some(n) => format!("{}[{}]", element.name, n),
            None => format!("{}[]", element.name),
        };
        Type::new(
            name,
            TypeKind::Array {
                element: element.clone(),
                count,
            },
        )
    }

    pub fn new_struct(name: impl Into<String>, fields: Vec<Field>, interface_block: bool) -> TypeRef {
        Type::new(
            name,
            TypeKind::Struct {
                fields,
                interface_block,
            },
        )
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, TypeKind::Scalar(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self.kind, TypeKind::Vector { .. })
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self.kind, TypeKind::Matrix { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn is_unsized_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { count: None, .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct { .. })
    }

    pub fn is_interface_block(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Struct {
                interface_block: true,
                ..
            }
        )
    }

    pub fn is_effect_child(&self) -> bool {
        matches!(self.kind, TypeKind::Effect(_))
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.kind, TypeKind::Generic(_))
    }

    pub fn is_poison(&self) -> bool {
        matches!(self.kind, TypeKind::Poison)
    }

    pub fn effect_kind(&self) -> Option<EffectKind> {
        match self.kind {
            TypeKind::Effect(kind) => Some(kind),
            _ => None,
        }
    }

    /// The scalar type of a scalar, vector or matrix; the element type of an array.
    pub fn component_type(self: &Arc<Self>) -> TypeRef {
        match &self.kind {
            TypeKind::Vector { component, .. } | TypeKind::Matrix { component, .. } => component.clone(),
            TypeKind::Array { element, .. } => element.clone(),
            _ => self.clone(),
        }
    }

    pub fn number_kind(&self) -> NumberKind {
        match &self.kind {
            TypeKind::Scalar(kind) => *kind,
            TypeKind::Vector { component, .. } | TypeKind::Matrix { component, .. } => component.number_kind(),
            _ => NumberKind::Nonnumeric,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self.number_kind(),
            NumberKind::Float | NumberKind::Signed | NumberKind::Unsigned
        )
    }

    pub fn is_float(&self) -> bool {
        self.number_kind() == NumberKind::Float
    }

    pub fn is_signed(&self) -> bool {
        self.number_kind() == NumberKind::Signed
    }

    pub fn is_unsigned(&self) -> bool {
        self.number_kind() == NumberKind::Unsigned
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_boolean(&self) -> bool {
        self.number_kind() == NumberKind::Boolean
    }

    /// Columns of a vector or matrix; 1 for scalars.
    pub fn columns(&self) -> usize {
        match &self.kind {
            TypeKind::Scalar(_) => 1,
            TypeKind::Vector { columns, .. } | TypeKind::Matrix { columns, .. } => *columns as usize,
            TypeKind::Array { count, .. } => count.unwrap_or(0) as usize,
            _ => 0,
        }
    }

    /// Rows of a matrix; 1 for scalars and vectors.
    pub fn rows(&self) -> usize {
        match &self.kind {
            TypeKind::Matrix { rows, .. } => *rows as usize,
            TypeKind::Scalar(_) | TypeKind::Vector { .. } => 1,
            _ => 0,
        }
    }

    pub fn array_size(&self) -> Option<usize> {
        match &self.kind {
            TypeKind::Array { count, .. } => count.map(|c| c as usize),
            _ => None,
        }
    }

    pub fn fields(&self) -> &[Field] {
        match &self.kind {
            TypeKind::Struct { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Number of scalar slots a value of this type occupies.
    pub fn slot_count(&self) -> usize {
        match &self.kind {
            TypeKind::Scalar(_) => 1,
            TypeKind::Vector { columns, .. } => *columns as usize,
            TypeKind::Matrix { columns, rows, .. } => (*columns as usize) * (*rows as usize),
            TypeKind::Array { element, count } => element.slot_count() * count.unwrap_or(0) as usize,
            TypeKind::Struct { fields, .. } => fields.iter().map(|f| f.ty.slot_count()).sum(),
            TypeKind::Void | TypeKind::Effect(_) | TypeKind::Generic(_) | TypeKind::Poison => 0,
        }
    }

    /// Slot offset of a struct field relative to the start of the struct.
    pub fn field_slot_offset(&self, field_index: usize) -> usize {
        self.fields()
            .iter()
            .take(field_index)
            .map(|f| f.ty.slot_count())
            .sum()
    }

    pub fn is_or_contains_array(&self) -> bool {
        match &self.kind {
            TypeKind::Array { .. } => true,
            TypeKind::Struct { fields, .. } => fields.iter().any(|f| f.ty.is_or_contains_array()),
            _ => false,
        }
    }

    pub fn is_or_contains_effect(&self) -> bool {
        match &self.kind {
            TypeKind::Effect(_) => true,
            TypeKind::Array { element, .. } => element.is_or_contains_effect(),
            TypeKind::Struct { fields, .. } => fields.iter().any(|f| f.ty.is_or_contains_effect()),
            _ => false,
        }
    }

    /// Types that may be compared with `==` and assigned as whole values.
    pub fn supports_equality(&self) -> bool {
        !self.is_void() && !self.is_or_contains_effect() && !self.is_unsized_array()
    }

    /// Depth of struct nesting, counting this type.
    pub fn struct_nesting_depth(&self) -> usize {
        match &self.kind {
            TypeKind::Struct { fields, .. } => {
                1 + fields
                    .iter()
                    .map(|f| f.ty.struct_nesting_depth())
                    .max()
                    .unwrap_or(0)
            }
            TypeKind::Array { element, .. } => element.struct_nesting_depth(),
            _ => 0,
        }
    }

    /// Same shape (columns and rows) as `other`, ignoring number kind.
    pub fn same_shape(&self, other: &Type) -> bool {
        let shaped = |t: &Type| t.is_scalar() || t.is_vector() || t.is_matrix();
        shaped(self)
            && shaped(other)
            && self.is_matrix() == other.is_matrix()
            && self.columns() == other.columns()
            && self.rows() == other.rows()
    }

    /// Cost of implicitly converting a value of this type into `other`, or
    /// `None` if no implicit conversion exists.
    pub fn coercion_cost(&self, other: &Type) -> Option<u32> {
        if self == other {
            return Some(0);
        }
        if let TypeKind::Generic(members) = &other.kind {
            return members.iter().filter_map(|m| self.coercion_cost(m)).min();
        }
        if !self.same_shape(other) {
            return None;
        }
        let from = self.component_scalar_name();
        let to = other.component_scalar_name();
        match (self.number_kind(), other.number_kind()) {
            // half <-> float, short <-> int, ushort <-> uint
            (a, b) if a == b && from != to => Some(1),
            (NumberKind::Signed | NumberKind::Unsigned, NumberKind::Float) => Some(2),
            _ => None,
        }
    }

    fn component_scalar_name(&self) -> &str {
        match &self.kind {
            TypeKind::Vector { component, .. } | TypeKind::Matrix { component, .. } => &component.name,
            _ => &self.name,
        }
    }

    /// The vector or matrix of this scalar type with the given dimensions.
    pub fn to_compound(self: &Arc<Self>, columns: usize, rows: usize) -> Option<TypeRef> {
        let types = builtin_types();
        let scalar = self.component_type();
        if rows > 1 {
            return types.matrix(&scalar, columns, rows);
        }
        if columns == 1 {
            return Some(scalar);
        }
        types.vector(&scalar, columns)
    }

    /// True for placeholder types that only appear in built-in signatures.
    pub fn is_private(&self) -> bool {
        self.name.starts_with('$')
    }
}

/// Every built-in type, created once per process.
pub struct BuiltinTypes {
    pub void: TypeRef,
    pub float: TypeRef,
    pub half: TypeRef,
    pub int: TypeRef,
    pub uint: TypeRef,
    pub short: TypeRef,
    pub ushort: TypeRef,
    pub bool_: TypeRef,
    pub float_vecs: [TypeRef; 3],
    pub half_vecs: [TypeRef; 3],
    pub int_vecs: [TypeRef; 3],
    pub uint_vecs: [TypeRef; 3],
    pub short_vecs: [TypeRef; 3],
    pub ushort_vecs: [TypeRef; 3],
    pub bool_vecs: [TypeRef; 3],
    /// Indexed by `(columns - 2) * 3 + (rows - 2)`.
    pub float_mats: Vec<TypeRef>,
    pub half_mats: Vec<TypeRef>,
    pub shader: TypeRef,
    pub color_filter: TypeRef,
    pub blender: TypeRef,
    pub poison: TypeRef,
    pub generics: Vec<TypeRef>,
}

fn make_vecs(scalar: &TypeRef) -> [TypeRef; 3] {
    let make = |n: u8| {
        Type::new(
            format!("{}{}", scalar.name, n),
            TypeKind::Vector {
                component: scalar.clone(),
                columns: n,
            },
        )
    };
    [make(2), make(3), make(4)]
}

fn make_mats(scalar: &TypeRef) -> Vec<TypeRef> {
    let mut mats = Vec::with_capacity(9);
    for columns in 2..=4u8 {
        for rows in 2..=4u8 {
            mats.push(Type::new(
                format!("{}{}x{}", scalar.name, columns, rows),
                TypeKind::Matrix {
                    component: scalar.clone(),
                    columns,
                    rows,
                },
            ));
        }
    }
    mats
}

impl BuiltinTypes {
    fn new() -> Self {
        let scalar = |name: &str, kind| Type::new(name, TypeKind::Scalar(kind));
        let float = scalar("float", NumberKind::Float);
        let half = scalar("half", NumberKind::Float);
        let int = scalar("int", NumberKind::Signed);
        let uint = scalar("uint", NumberKind::Unsigned);
        let short = scalar("short", NumberKind::Signed);
        let ushort = scalar("ushort", NumberKind::Unsigned);
        let bool_ = scalar("bool", NumberKind::Boolean);

        let float_vecs = make_vecs(&float);
        let half_vecs = make_vecs(&half);
        let int_vecs = make_vecs(&int);
        let uint_vecs = make_vecs(&uint);
        let short_vecs = make_vecs(&short);
        let ushort_vecs = make_vecs(&ushort);
        let bool_vecs = make_vecs(&bool_);
        let float_mats = make_mats(&float);
        let half_mats = make_mats(&half);

        let family = |s: &TypeRef, v: &[TypeRef; 3]| {
            let mut all = vec![s.clone()];
            all.extend(v.iter().cloned());
            all
        };
        let square = |m: &[TypeRef]| vec![m[0].clone(), m[4].clone(), m[8].clone()];
        let generic = |name: &str, members: Vec<TypeRef>| Type::new(name, TypeKind::Generic(members));
        let generics = vec![
            generic("$genType", family(&float, &float_vecs)),
            generic("$genHType", family(&half, &half_vecs)),
            generic("$genIType", family(&int, &int_vecs)),
            generic("$genUType", family(&uint, &uint_vecs)),
            generic("$genBType", family(&bool_, &bool_vecs)),
            generic("$vec", float_vecs.to_vec()),
            generic("$hvec", half_vecs.to_vec()),
            generic("$ivec", int_vecs.to_vec()),
            generic("$uvec", uint_vecs.to_vec()),
            generic("$bvec", bool_vecs.to_vec()),
            generic("$mat", float_mats.clone()),
            generic("$hmat", half_mats.clone()),
            generic("$squareMat", square(&float_mats)),
            generic("$squareHMat", square(&half_mats)),
        ];

        BuiltinTypes {
            void: Type::new("void", TypeKind::Void),
            float,
            half,
            int,
            uint,
            short,
            ushort,
            bool_,
            float_vecs,
            half_vecs,
            int_vecs,
            uint_vecs,
            short_vecs,
            ushort_vecs,
            bool_vecs,
            float_mats,
            half_mats,
            shader: Type::new("shader", TypeKind::Effect(EffectKind::Shader)),
            color_filter: Type::new("colorFilter", TypeKind::Effect(EffectKind::ColorFilter)),
            blender: Type::new("blender", TypeKind::Effect(EffectKind::Blender)),
            poison: Type::new("<POISON>", TypeKind::Poison),
            generics,
        }
    }

    pub fn vector(&self, scalar: &TypeRef, columns: usize) -> Option<TypeRef> {
        if !(2..=4).contains(&columns) {
            return None;
        }
        let vecs = match scalar.name.as_str() {
            "float" => &self.float_vecs,
            "half" => &self.half_vecs,
            "int" => &self.int_vecs,
            "uint" => &self.uint_vecs,
            "short" => &self.short_vecs,
            "ushort" => &self.ushort_vecs,
            "bool" => &self.bool_vecs,
            _ => return None,
        };
        Some(vecs[columns - 2].clone())
    }

    pub fn matrix(&self, scalar: &TypeRef, columns: usize, rows: usize) -> Option<TypeRef> {
        if !(2..=4).contains(&columns) || !(2..=4).contains(&rows) {
            return None;
        }
        let mats = match scalar.name.as_str() {
            "float" => &self.float_mats,
            "half" => &self.half_mats,
            _ => return None,
        };
        Some(mats[(columns - 2) * 3 + (rows - 2)].clone())
    }

    /// Every nameable built-in type paired with the names it is visible under.
    pub fn all_named(&self) -> Vec<(String, TypeRef)> {
        let mut out: Vec<(String, TypeRef)> = Vec::new();
        let mut add = |t: &TypeRef| out.push((t.name.clone(), t.clone()));
        for t in [
            &self.void, &self.float, &self.half, &self.int, &self.uint, &self.short, &self.ushort,
            &self.bool_, &self.shader, &self.color_filter, &self.blender,
        ] {
            add(t);
        }
        for vecs in [
            &self.float_vecs, &self.half_vecs, &self.int_vecs, &self.uint_vecs, &self.short_vecs,
            &self.ushort_vecs, &self.bool_vecs,
        ] {
            vecs.iter().for_each(&mut add);
        }
        self.float_mats.iter().for_each(&mut add);
        self.half_mats.iter().for_each(&mut add);
        self.generics.iter().for_each(&mut add);

        // GLSL spellings
        for n in 2..=4usize {
            out.push((format!("vec{}", n), self.float_vecs[n - 2].clone()));
            out.push((format!("ivec{}", n), self.int_vecs[n - 2].clone()));
            out.push((format!("uvec{}", n), self.uint_vecs[n - 2].clone()));
            out.push((format!("bvec{}", n), self.bool_vecs[n - 2].clone()));
            out.push((format!("mat{}", n), self.float_mats[(n - 2) * 4].clone()));
            for r in 2..=4usize {
                out.push((format!("mat{}x{}", n, r), self.float_mats[(n - 2) * 3 + (r - 2)].clone()));
            }
        }
        out
    }
}

pub fn builtin_types() -> &'static BuiltinTypes {
    static TYPES: OnceLock<BuiltinTypes> = OnceLock::new();
    TYPES.get_or_init(BuiltinTypes::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_counts() {
        let t = builtin_types();
        assert_eq!(t.float.slot_count(), 1);
        assert_eq!(t.float_vecs[2].slot_count(), 4);
        assert_eq!(t.float_mats[(3 - 2) * 3 + (2 - 2)].slot_count(), 6);
        let arr = Type::new_array(&t.half_vecs[1], Some(5));
        assert_eq!(arr.name, "half3[5]");
        assert_eq!(arr.slot_count(), 15);
    }

    #[test]
    fn test_coercion() {
        let t = builtin_types();
        assert_eq!(t.int.coercion_cost(&t.int), Some(0));
        assert_eq!(t.half.coercion_cost(&t.float), Some(1));
        assert_eq!(t.int_vecs[0].coercion_cost(&t.float_vecs[0]), Some(2));
        assert_eq!(t.float.coercion_cost(&t.int), None);
        assert_eq!(t.float.coercion_cost(&t.float_vecs[0]), None);
        assert_eq!(t.bool_.coercion_cost(&t.float), None);
    }

    #[test]
    fn test_matrix_lookup() {
        let t = builtin_types();
        let m = t.matrix(&t.float, 2, 4).unwrap();
        assert_eq!(m.name, "float2x4");
        assert_eq!((m.columns(), m.rows()), (2, 4));
        assert_eq!(t.float.to_compound(3, 1).unwrap().name, "float3");
    }

    #[test]
    fn test_struct_layout() {
        let t = builtin_types();
        let field = |name: &str, ty: &TypeRef| Field {
            name: name.to_string(),
            ty: ty.clone(),
            modifiers: Modifiers::default(),
            position: Position::default(),
        };
        let s = Type::new_struct("S", vec![field("a", &t.float_vecs[1]), field("b", &t.int)], false);
        assert_eq!(s.slot_count(), 4);
        assert_eq!(s.field_slot_offset(1), 3);
        assert_eq!(s.struct_nesting_depth(), 1);
    }
}
