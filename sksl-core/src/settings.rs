use serde::{Deserialize, Serialize};

/// Language versions accepted by `#version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Version {
    V100,
    V300,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Highest `#version` a program may request.
    pub max_version_allowed: Version,
    /// Permits identifiers starting with `$`, normally reserved for built-in modules.
    pub allow_private_identifiers: bool,
    /// Restricts loops and indexing to the ES2 subset.
    pub enforce_es2_restrictions: bool,
    /// Records slot names and trace events alongside the generated program.
    pub debug_trace: bool,
    /// Folds literal arithmetic and promotes constant locals to immutable slots.
    pub optimize: bool,
    /// Lane width of the reference host pipeline.
    pub lane_count: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_version_allowed: Version::V300,
            allow_private_identifiers: false,
            enforce_es2_restrictions: false,
            debug_trace: false,
            optimize: true,
            lane_count: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramKind {
    Fragment,
    Vertex,
    Compute,
    GraphiteFragment,
    GraphiteVertex,
    GraphiteFragmentES2,
    GraphiteVertexES2,
    RuntimeShader,
    RuntimeColorFilter,
    RuntimeBlender,
    Generic,
}

impl ProgramKind {
    pub fn is_runtime_effect(self) -> bool {
        matches!(
            self,
            ProgramKind::RuntimeShader | ProgramKind::RuntimeColorFilter | ProgramKind::RuntimeBlender
        )
    }

    pub fn is_fragment(self) -> bool {
        matches!(
            self,
            ProgramKind::Fragment | ProgramKind::GraphiteFragment | ProgramKind::GraphiteFragmentES2
        )
    }

    pub fn is_vertex(self) -> bool {
        matches!(
            self,
            ProgramKind::Vertex | ProgramKind::GraphiteVertex | ProgramKind::GraphiteVertexES2
        )
    }

    pub fn is_compute(self) -> bool {
        self == ProgramKind::Compute
    }

    /// Unsized arrays (`float x[]`) are only meaningful in stage code with
    /// buffer-backed storage.
    pub fn allows_unsized_arrays(self) -> bool {
        self.is_fragment() || self.is_vertex() || self.is_compute()
    }

    pub fn is_es2(self) -> bool {
        matches!(self, ProgramKind::GraphiteFragmentES2 | ProgramKind::GraphiteVertexES2)
    }

    pub fn name(self) -> &'static str {
        match self {
            ProgramKind::Fragment => "fragment",
            ProgramKind::Vertex => "vertex",
            ProgramKind::Compute => "compute",
            ProgramKind::GraphiteFragment => "graphite-fragment",
            ProgramKind::GraphiteVertex => "graphite-vertex",
            ProgramKind::GraphiteFragmentES2 => "graphite-fragment-es2",
            ProgramKind::GraphiteVertexES2 => "graphite-vertex-es2",
            ProgramKind::RuntimeShader => "runtime-shader",
            ProgramKind::RuntimeColorFilter => "runtime-color-filter",
            ProgramKind::RuntimeBlender => "runtime-blender",
            ProgramKind::Generic => "generic",
        }
    }
}

impl std::str::FromStr for ProgramKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kinds = [
            ProgramKind::Fragment,
            ProgramKind::Vertex,
            ProgramKind::Compute,
            ProgramKind::GraphiteFragment,
            ProgramKind::GraphiteVertex,
            ProgramKind::GraphiteFragmentES2,
            ProgramKind::GraphiteVertexES2,
            ProgramKind::RuntimeShader,
            ProgramKind::RuntimeColorFilter,
            ProgramKind::RuntimeBlender,
            ProgramKind::Generic,
        ];
        kinds
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown program kind '{}'", s))
    }
}
