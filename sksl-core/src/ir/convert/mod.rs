//! Type-checked construction of IR nodes.
//!
//! The parser never builds an IR node directly; it hands the pieces to a
//! `convert_*` function which validates them, inserts implicit conversions,
//! folds constants and reports errors through the context. A failed
//! conversion reports once and yields a poison expression (or a no-op
//! statement) so that enclosing productions do not cascade further errors.

pub mod calls;
pub mod constructors;
pub mod declarations;
pub mod expressions;
pub mod statements;

pub use calls::{convert_function_call, convert_method_call};
pub use constructors::convert_constructor;
pub use declarations::{
    array_type, declare_function, declare_global_variable, declare_interface_block, declare_prototype,
    declare_struct, finish_function, finish_program, make_parameter, start_function,
};
pub use expressions::{
    coerce, convert_binary, convert_field_access, convert_identifier, convert_index, convert_postfix,
    convert_prefix, convert_swizzle, convert_ternary,
};
pub use statements::{
    ParsedCase,
    convert_break, convert_continue, convert_discard, convert_do, convert_expression_statement,
    convert_for, convert_if, convert_return, convert_switch, convert_var_declaration, convert_while,
};
