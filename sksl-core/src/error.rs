use crate::diags::Diagnostic;
use crate::position::Position;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Parse error: {0}")]
    ParseError(String, Option<Position>),

    #[error("{} error(s) reported", .0.len())]
    Diagnostics(Vec<Diagnostic>),

    #[error("Unsupported by the raster pipeline backend: {0}")]
    Unsupported(String),

    #[error("Module system error: {0}")]
    ModuleError(String, Option<Position>),

    #[error("Pipeline lowering error: {0}")]
    PipelineError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CompilerError {
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::ParseError(_, pos) => *pos,
            Self::ModuleError(_, pos) => *pos,
            Self::Diagnostics(diags) => diags.first().map(|d| d.position),
            Self::Unsupported(_) | Self::PipelineError(_) | Self::IoError(_) | Self::JsonError(_) => {
                None
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

// Bail macros without position

#[macro_export]
macro_rules! bail_parse {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::ParseError(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_unsupported {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::Unsupported(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_module {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::ModuleError(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_pipeline {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::PipelineError(format!($($arg)*)))
    };
}

// Bail macros with position

#[macro_export]
macro_rules! bail_parse_at {
    ($pos:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::ParseError(format!($($arg)*), Some($pos)))
    };
}

#[macro_export]
macro_rules! bail_module_at {
    ($pos:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::ModuleError(format!($($arg)*), Some($pos)))
    };
}
