//! Built-in module loading.
//!
//! Every program is compiled on top of a chain of modules holding the
//! standard library:
//!
//! ```text
//! Root -> Shared -> GPU -> Vertex   -> Graphite Vertex   (+ ES2)
//!                       -> Fragment -> Graphite Fragment (+ ES2)
//!                       -> Compute
//!         Shared -> Public -> Runtime Shader
//! ```
//!
//! Modules are parsed lazily, at most once per process, and shared as
//! `Arc<Module>`. All access goes through [`ModuleLoader::get`], which holds
//! the process-wide cache lock until the loader is dropped.

use crate::bail_module;
use crate::context::Context;
use crate::diags::{format_diagnostics, DiagnosticCollector, ErrorSink};
use crate::error::Result;
use crate::ir::program::Module;
use crate::ir::types::builtin_types;
use crate::parser::Parser;
use crate::settings::{ProgramKind, Settings};
use crate::symbol_table::{Symbol, SymbolTable};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

const SHARED_SOURCE: &str = include_str!("modules/sksl_shared.sksl");
const GPU_SOURCE: &str = include_str!("modules/sksl_gpu.sksl");
const VERTEX_SOURCE: &str = include_str!("modules/sksl_vert.sksl");
const FRAGMENT_SOURCE: &str = include_str!("modules/sksl_frag.sksl");
const COMPUTE_SOURCE: &str = include_str!("modules/sksl_compute.sksl");
const GRAPHITE_VERTEX_SOURCE: &str = include_str!("modules/sksl_graphite_vert.sksl");
const GRAPHITE_FRAGMENT_SOURCE: &str = include_str!("modules/sksl_graphite_frag.sksl");
const PUBLIC_SOURCE: &str = include_str!("modules/sksl_public.sksl");
const RUNTIME_SHADER_SOURCE: &str = include_str!("modules/sksl_rt_shader.sksl");

#[derive(Default)]
struct ModuleCache {
    root: Option<Arc<Module>>,
    shared: Option<Arc<Module>>,
    gpu: Option<Arc<Module>>,
    vertex: Option<Arc<Module>>,
    fragment: Option<Arc<Module>>,
    compute: Option<Arc<Module>>,
    graphite_vertex: Option<Arc<Module>>,
    graphite_fragment: Option<Arc<Module>>,
    graphite_vertex_es2: Option<Arc<Module>>,
    graphite_fragment_es2: Option<Arc<Module>>,
    public: Option<Arc<Module>>,
    runtime_shader: Option<Arc<Module>>,
}

fn cache() -> &'static Mutex<ModuleCache> {
    static CACHE: OnceLock<Mutex<ModuleCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(ModuleCache::default()))
}

/// Exclusive handle on the module cache. The lock is released when the
/// loader goes out of scope.
pub struct ModuleLoader {
    cache: MutexGuard<'static, ModuleCache>,
}

/// Parses `source` as a module of `kind` on top of `parent`. Any error in a
/// built-in module is fatal for the whole load.
fn compile_module(kind: ProgramKind, name: &'static str, source: &str, parent: Arc<Module>) -> Result<Arc<Module>> {
    let mut collector = DiagnosticCollector::new();
    let module = {
        let settings = Settings {
            allow_private_identifiers: true,
            ..Settings::default()
        };
        let ctx = Context::new(kind, settings, Some(parent), true, ErrorSink::new(&mut collector));
        Parser::new(source, ctx).module_inheriting_from(name)
    };
    if !collector.diagnostics().is_empty() {
        bail_module!(
            "module '{}' failed to compile:\n{}",
            name,
            format_diagnostics(source, collector.diagnostics()).trim_end()
        );
    }
    debug!("loaded module '{}' ({} elements)", name, module.elements.len());
    Ok(Arc::new(module))
}

fn memoize(
    slot: &mut Option<Arc<Module>>,
    build: impl FnOnce() -> Result<Arc<Module>>,
) -> Result<Arc<Module>> {
    if let Some(module) = slot {
        return Ok(module.clone());
    }
    let module = build()?;
    *slot = Some(module.clone());
    Ok(module)
}

impl ModuleLoader {
    /// Locks the process-wide cache. A panic in another thread while it held
    /// the lock leaves the cache usable, since entries are only written once
    /// complete.
    pub fn get() -> ModuleLoader {
        ModuleLoader {
            cache: cache().lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// The root module: every built-in type and nothing else.
    pub fn root_module(&mut self) -> Arc<Module> {
        self.cache
            .root
            .get_or_insert_with(|| {
                let mut symbols = SymbolTable::new(None, true);
                for (name, ty) in builtin_types().all_named() {
                    // Names in all_named are unique; a collision would be a
                    // bug in the type table, not a user error.
                    let inserted = symbols.insert(&name, Symbol::Type(ty));
                    debug_assert!(inserted.is_ok(), "duplicate built-in type '{}'", name);
                }
                debug!("loaded module 'root'");
                Arc::new(Module {
                    name: "root",
                    symbols: Arc::new(symbols),
                    elements: Vec::new(),
                    parent: None,
                })
            })
            .clone()
    }

    pub fn load_shared_module(&mut self) -> Result<Arc<Module>> {
        let root = self.root_module();
        memoize(&mut self.cache.shared, || {
            compile_module(ProgramKind::Generic, "sksl_shared", SHARED_SOURCE, root)
        })
    }

    pub fn load_gpu_module(&mut self) -> Result<Arc<Module>> {
        let shared = self.load_shared_module()?;
        memoize(&mut self.cache.gpu, || {
            compile_module(ProgramKind::Fragment, "sksl_gpu", GPU_SOURCE, shared)
        })
    }

    pub fn load_vertex_module(&mut self) -> Result<Arc<Module>> {
        let gpu = self.load_gpu_module()?;
        memoize(&mut self.cache.vertex, || {
            compile_module(ProgramKind::Vertex, "sksl_vert", VERTEX_SOURCE, gpu)
        })
    }

    pub fn load_fragment_module(&mut self) -> Result<Arc<Module>> {
        let gpu = self.load_gpu_module()?;
        memoize(&mut self.cache.fragment, || {
            compile_module(ProgramKind::Fragment, "sksl_frag", FRAGMENT_SOURCE, gpu)
        })
    }

    pub fn load_compute_module(&mut self) -> Result<Arc<Module>> {
        let gpu = self.load_gpu_module()?;
        memoize(&mut self.cache.compute, || {
            compile_module(ProgramKind::Compute, "sksl_compute", COMPUTE_SOURCE, gpu)
        })
    }

    pub fn load_graphite_vertex_module(&mut self) -> Result<Arc<Module>> {
        let vertex = self.load_vertex_module()?;
        memoize(&mut self.cache.graphite_vertex, || {
            compile_module(
                ProgramKind::GraphiteVertex,
                "sksl_graphite_vert",
                GRAPHITE_VERTEX_SOURCE,
                vertex,
            )
        })
    }

    pub fn load_graphite_fragment_module(&mut self) -> Result<Arc<Module>> {
        let fragment = self.load_fragment_module()?;
        memoize(&mut self.cache.graphite_fragment, || {
            compile_module(
                ProgramKind::GraphiteFragment,
                "sksl_graphite_frag",
                GRAPHITE_FRAGMENT_SOURCE,
                fragment,
            )
        })
    }

    pub fn load_graphite_vertex_es2_module(&mut self) -> Result<Arc<Module>> {
        let vertex = self.load_vertex_module()?;
        memoize(&mut self.cache.graphite_vertex_es2, || {
            compile_module(
                ProgramKind::GraphiteVertexES2,
                "sksl_graphite_vert_es2",
                GRAPHITE_VERTEX_SOURCE,
                vertex,
            )
        })
    }

    pub fn load_graphite_fragment_es2_module(&mut self) -> Result<Arc<Module>> {
        let fragment = self.load_fragment_module()?;
        memoize(&mut self.cache.graphite_fragment_es2, || {
            compile_module(
                ProgramKind::GraphiteFragmentES2,
                "sksl_graphite_frag_es2",
                GRAPHITE_FRAGMENT_SOURCE,
                fragment,
            )
        })
    }

    pub fn load_public_module(&mut self) -> Result<Arc<Module>> {
        let shared = self.load_shared_module()?;
        memoize(&mut self.cache.public, || {
            compile_module(ProgramKind::Generic, "sksl_public", PUBLIC_SOURCE, shared)
        })
    }

    pub fn load_runtime_shader_module(&mut self) -> Result<Arc<Module>> {
        let public = self.load_public_module()?;
        memoize(&mut self.cache.runtime_shader, || {
            compile_module(
                ProgramKind::RuntimeShader,
                "sksl_rt_shader",
                RUNTIME_SHADER_SOURCE,
                public,
            )
        })
    }

    /// The module a program of `kind` is compiled against.
    pub fn module_for_program_kind(&mut self, kind: ProgramKind) -> Result<Arc<Module>> {
        match kind {
            ProgramKind::Vertex => self.load_vertex_module(),
            ProgramKind::Fragment => self.load_fragment_module(),
            ProgramKind::Compute => self.load_compute_module(),
            ProgramKind::GraphiteVertex => self.load_graphite_vertex_module(),
            ProgramKind::GraphiteFragment => self.load_graphite_fragment_module(),
            ProgramKind::GraphiteVertexES2 => self.load_graphite_vertex_es2_module(),
            ProgramKind::GraphiteFragmentES2 => self.load_graphite_fragment_es2_module(),
            ProgramKind::RuntimeShader => self.load_runtime_shader_module(),
            ProgramKind::RuntimeColorFilter | ProgramKind::RuntimeBlender | ProgramKind::Generic => {
                self.load_public_module()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(module: &Arc<Module>) -> Vec<&'static str> {
        let mut names = vec![module.name];
        let mut current = module.parent.clone();
        while let Some(m) = current {
            names.push(m.name);
            current = m.parent.clone();
        }
        names
    }

    #[test]
    fn test_every_module_compiles() {
        let _ = env_logger::builder().is_test(true).try_init();
        let kinds = [
            ProgramKind::Vertex,
            ProgramKind::Fragment,
            ProgramKind::Compute,
            ProgramKind::GraphiteVertex,
            ProgramKind::GraphiteFragment,
            ProgramKind::GraphiteVertexES2,
            ProgramKind::GraphiteFragmentES2,
            ProgramKind::RuntimeShader,
            ProgramKind::RuntimeColorFilter,
            ProgramKind::RuntimeBlender,
            ProgramKind::Generic,
        ];
        for kind in kinds {
            let module = ModuleLoader::get().module_for_program_kind(kind);
            assert!(module.is_ok(), "{:?}: {:?}", kind, module.err());
        }
    }

    #[test]
    fn test_module_chains() {
        let mut loader = ModuleLoader::get();
        let graphite = loader.load_graphite_fragment_module().unwrap();
        assert_eq!(
            chain(&graphite),
            vec!["sksl_graphite_frag", "sksl_frag", "sksl_gpu", "sksl_shared", "root"]
        );
        let runtime = loader.load_runtime_shader_module().unwrap();
        assert_eq!(chain(&runtime), vec!["sksl_rt_shader", "sksl_public", "sksl_shared", "root"]);
    }

    #[test]
    fn test_modules_are_memoized() {
        let first = ModuleLoader::get().load_shared_module().unwrap();
        let second = ModuleLoader::get().load_shared_module().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_symbols_inherit_through_the_chain() {
        let module = ModuleLoader::get().load_runtime_shader_module().unwrap();
        assert!(module.symbols.is_type("float4"));
        assert!(matches!(module.symbols.lookup("sk_FragCoord"), Some(Symbol::Variable(_))));
        assert!(matches!(module.symbols.lookup("unpremul"), Some(Symbol::Functions(f)) if f.len() == 2));
        assert!(matches!(module.symbols.lookup("clamp"), Some(Symbol::Functions(_))));
    }
}
