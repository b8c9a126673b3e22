//! Lowers a type-checked [`ir::Program`] to raster-pipeline instructions.
//!
//! Every value lives either in a named slot range or on one of several
//! temporary stacks. Stack 0 carries expression evaluation; extra stacks hold
//! values that must outlive an expression, such as dynamic index offsets,
//! saved masks of a `switch` and the test of a masked ternary.

mod expressions;
mod intrinsics;
mod lvalue;
mod slots;
mod statements;

use crate::analysis::{function_has_early_return, ProgramUsage};
use crate::error::Result;
use crate::ir::{self, FunctionDeclaration, FunctionDefinition, Variable};
use crate::position::Position;
use crate::rp::builder::{Builder, SlotRange};
use crate::rp::debug_trace::{DebugTrace, FunctionDebugInfo};
use crate::rp::program::Program;
use crate::{bail_unsupported, ProgramKind};
use slots::{ImmutableStore, SlotManager};
use std::collections::HashMap;

const SK_FRAGCOORD_BUILTIN: i32 = 15;
const SK_FRAGCOLOR_BUILTIN: i32 = 10001;

/// Generates a raster-pipeline program for `program`.
pub fn generate(program: &ir::Program) -> Result<Program> {
    let mut generator = Generator::new(program);
    generator.write_program()?;
    let program = generator.finish()?;
    log::debug!(
        "generated {} instructions, {} value slots, {} uniform slots",
        program.instructions().len(),
        program.num_value_slots(),
        program.num_uniform_slots()
    );
    Ok(program)
}

/// State of the function whose body is being written.
#[derive(Clone, Copy)]
struct Frame {
    result: Option<SlotRange>,
    uses_return_mask: bool,
}

pub(crate) struct Generator<'a> {
    program: &'a ir::Program,
    usage: ProgramUsage,
    builder: Builder,
    values: SlotManager,
    uniforms: SlotManager,
    immutables: ImmutableStore,
    immutable_vars: HashMap<u32, SlotRange>,
    child_indices: HashMap<u32, usize>,
    next_stack: i32,
    free_stacks: Vec<i32>,
    break_target: Option<i32>,
    continue_stack: Option<i32>,
    frame: Option<Frame>,
    function_indices: HashMap<u32, usize>,
    functions: Vec<FunctionDebugInfo>,
    frag_color: Option<SlotRange>,
    trace: bool,
}

impl<'a> Generator<'a> {
    fn new(program: &'a ir::Program) -> Generator<'a> {
        let trace = program.settings.debug_trace;
        Generator {
            program,
            usage: ProgramUsage::for_program(program),
            builder: Builder::new(),
            values: SlotManager::new(trace),
            uniforms: SlotManager::new(trace),
            immutables: ImmutableStore::default(),
            immutable_vars: HashMap::new(),
            child_indices: HashMap::new(),
            next_stack: 0,
            free_stacks: Vec::new(),
            break_target: None,
            continue_stack: None,
            frame: None,
            function_indices: HashMap::new(),
            functions: Vec::new(),
            frag_color: None,
            trace,
        }
    }

    fn finish(mut self) -> Result<Program> {
        let debug_trace = self.trace.then(|| DebugTrace {
            slot_info: self.values.take_debug_info(),
            uniform_info: self.uniforms.take_debug_info(),
            func_info: std::mem::take(&mut self.functions),
            trace_info: Vec::new(),
        });
        self.builder.finish(
            self.values.slot_count(),
            self.uniforms.slot_count(),
            self.immutables.slot_count(),
            debug_trace,
        )
    }

    fn line(&self, position: Position) -> usize {
        position.line(&self.program.source)
    }

    fn write_program(&mut self) -> Result<()> {
        let Some(main) = self.program.main().cloned() else {
            bail_unsupported!("program has no main function");
        };
        self.builder.init_lane_masks();

        let mut children = 0;
        for (variable, _) in self.program.global_variables() {
            if variable.ty.is_effect_child() {
                self.child_indices.insert(variable.id, children);
                children += 1;
            } else if variable.is_uniform() {
                let line = self.line(variable.position);
                self.uniforms.get_or_allocate(variable, line);
            }
        }

        self.store_main_parameters(&main.declaration)?;

        let globals: Vec<_> = self
            .program
            .global_variables()
            .map(|(variable, value)| (variable.clone(), value.cloned()))
            .collect();
        for (variable, value) in &globals {
            if variable.is_uniform() || variable.ty.is_effect_child() || variable.builtin {
                continue;
            }
            let counts = self.usage.get(variable);
            let initializer_writes = usize::from(value.is_some());
            if counts.reads == 0 && counts.writes <= initializer_writes {
                continue;
            }
            self.write_var_declaration(variable, value.as_ref())?;
        }

        let result = if main.declaration.return_type.is_void() {
            None
        } else {
            let line = self.line(main.declaration.position);
            let index = self.function_index(&main.declaration);
            Some(self.values.allocate(
                &format!("[{}].result", main.declaration.name),
                &main.declaration.return_type,
                line,
                index,
            ))
        };
        self.write_function(&main, result)?;

        match (result, self.frag_color) {
            (Some(result), _) => self.builder.load_src(result),
            (None, Some(color)) => self.builder.load_src(color),
            (None, None) => {
                self.builder.push_zeros(4);
                self.builder.pop_src_rgba();
            }
        }
        Ok(())
    }

    /// Copies the incoming coordinates and colors into `main`'s parameters.
    fn store_main_parameters(&mut self, main: &FunctionDeclaration) -> Result<()> {
        let mut colors = 0;
        for parameter in &main.parameters {
            let line = self.line(parameter.position);
            let slots = self.values.get_or_allocate(parameter, line);
            match slots.count {
                2 => self.builder.store_src_rg(slots),
                4 if colors == 0 => {
                    self.builder.store_src(slots);
                    colors += 1;
                }
                4 if colors == 1 && self.program.kind == ProgramKind::RuntimeBlender => {
                    self.builder.store_dst(slots);
                    colors += 1;
                }
                _ => bail_unsupported!(
                    "unsupported main parameter '{} {}'",
                    parameter.ty,
                    parameter.name
                ),
            }
        }
        Ok(())
    }

    fn write_function(&mut self, function: &FunctionDefinition, result: Option<SlotRange>) -> Result<()> {
        let uses_return_mask = function_has_early_return(&function.body);
        let saved_frame = self.frame.replace(Frame {
            result,
            uses_return_mask,
        });
        let saved_break = self.break_target.take();
        let saved_continue = self.continue_stack.take();

        if uses_return_mask {
            self.builder.enable_execution_mask_writes();
            self.builder.push_return_mask();
        }
        let index = self.function_index(&function.declaration);
        if let Some(index) = index {
            self.builder.trace_enter(index);
        }
        let written = self.write_statement(&function.body);
        if let Some(index) = index {
            self.builder.trace_exit(index);
        }
        if uses_return_mask {
            self.builder.pop_return_mask();
            self.builder.disable_execution_mask_writes();
        }

        self.frame = saved_frame;
        self.break_target = saved_break;
        self.continue_stack = saved_continue;
        written
    }

    /// Position of `function` in the trace's function table, when tracing.
    fn function_index(&mut self, function: &FunctionDeclaration) -> Option<usize> {
        if !self.trace {
            return None;
        }
        let next = self.functions.len();
        let index = *self.function_indices.entry(function.id).or_insert(next);
        if index == next {
            self.functions.push(FunctionDebugInfo {
                name: function.signature(),
            });
        }
        Some(index)
    }

    fn create_stack(&mut self) -> i32 {
        self.free_stacks.pop().unwrap_or_else(|| {
            self.next_stack += 1;
            self.next_stack
        })
    }

    fn recycle_stack(&mut self, stack: i32) {
        self.free_stacks.push(stack);
    }

    fn with_stack<T>(&mut self, stack: i32, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.builder.current_stack();
        self.builder.set_current_stack(stack);
        let result = f(self);
        self.builder.set_current_stack(saved);
        result
    }

    /// Drops the top `count` slots of another stack.
    fn discard_on_stack(&mut self, stack: i32, count: usize) -> Result<()> {
        self.with_stack(stack, |g| {
            g.builder.discard_stack(count);
            Ok(())
        })
    }

    fn is_frag_coord(variable: &Variable) -> bool {
        variable.modifiers.layout.builtin() == Some(SK_FRAGCOORD_BUILTIN)
    }

    fn is_frag_color(variable: &Variable) -> bool {
        variable.modifiers.layout.builtin() == Some(SK_FRAGCOLOR_BUILTIN)
    }
}

#[cfg(test)]
mod tests {
    use crate::rp::interp::{evaluate, Pixel};
    use crate::rp::Program;
    use crate::{Compiler, CompilerError, ProgramKind, Settings};

    fn compile(source: &str) -> Program {
        let _ = env_logger::builder().is_test(true).try_init();
        Compiler::default().compile(source).expect("compile")
    }

    fn run(source: &str, pixels: &[Pixel]) -> Vec<[f32; 4]> {
        let program = compile(source);
        evaluate(&program, 8, None, &[], pixels).expect("run").colors
    }

    fn run_at(source: &str, x: f32, y: f32) -> [f32; 4] {
        run(source, &[Pixel::at(x, y)])[0]
    }

    #[test]
    fn test_main_parameter_slots() {
        let program = compile("half4 main(float2 p) { return half4(p.x, p.y, 0, 1); }");
        assert_eq!(program.num_value_slots(), 6);
        assert_eq!(run_at("half4 main(float2 p) { return half4(p.x, p.y, 0, 1); }", 3.0, 5.0), [3.0, 5.0, 0.0, 1.0]);
    }

    #[test]
    fn test_overlapping_swizzle_assignment() {
        let source = "half4 main(float2 p) {
            float4 v = float4(p.x + 1, 2, 3, 4);
            v.yzw = v.xyz;
            float4 w = float4(p.x + 1, 2, 3, 4);
            w.xyz = w.yzw;
            return half4(v.y, v.z, v.w, w.x + w.y + w.z);
        }";
        assert_eq!(run_at(source, 0.0, 0.0), [1.0, 2.0, 3.0, 9.0]);
    }

    #[test]
    fn test_unused_postfix_step_matches_prefix() {
        let postfix = "half4 main(float2 p) {
            int n = int(p.x);
            float f = p.y;
            for (int i = 0; i < 4; i++) { n++; f--; }
            return half4(float(n), f, 0, 1);
        }";
        let prefix = "half4 main(float2 p) {
            int n = int(p.x);
            float f = p.y;
            for (int i = 0; i < 4; ++i) { ++n; --f; }
            return half4(float(n), f, 0, 1);
        }";
        assert_eq!(compile(postfix).dump(), compile(prefix).dump());
        assert_eq!(run_at(postfix, 2.0, 10.0), [6.0, 6.0, 0.0, 1.0]);
    }

    #[test]
    fn test_local_arithmetic() {
        let source = "half4 main(float2 p) {
            float a = p.x * 2 + 1;
            float b = a - p.y;
            b /= 2;
            return half4(a, b, -a, 1);
        }";
        assert_eq!(run_at(source, 2.0, 1.0), [5.0, 2.0, -5.0, 1.0]);
    }

    #[test]
    fn test_varying_if_uses_condition_mask() {
        let source = "half4 main(float2 p) {
            half4 c = half4(0, 0, 0, 1);
            if (p.x > 1) { c.r = 1; } else { c.g = 1; }
            return c;
        }";
        let program = compile(source);
        assert!(program.dump().contains("merge_condition_mask"), "{}", program.dump());
        let colors = run(source, &[Pixel::at(0.0, 0.0), Pixel::at(2.0, 0.0)]);
        assert_eq!(colors[0], [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(colors[1], [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_uniform_if_branches() {
        let source = "uniform float u;
        half4 main(float2 p) {
            if (u > 0) { return half4(1); }
            return half4(0, 0, 0, 1);
        }";
        let program = compile(source);
        let dump = program.dump();
        assert!(!dump.contains("merge_condition_mask"), "{}", dump);
        assert!(dump.contains("branch_if_no_active_lanes_eq"), "{}", dump);
        let on = evaluate(&program, 8, None, &[1.0], &[Pixel::at(0.0, 0.0)]).expect("run");
        let off = evaluate(&program, 8, None, &[0.0], &[Pixel::at(0.0, 0.0)]).expect("run");
        assert_eq!(on.colors[0], [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(off.colors[0], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unrollable_loop_is_maskless() {
        let source = "half4 main(float2 p) {
            float sum = 0;
            for (int i = 0; i < 4; i++) { sum += 0.25; }
            return half4(sum);
        }";
        let program = compile(source);
        assert!(!program.dump().contains("merge_loop_mask"), "{}", program.dump());
        assert_eq!(run_at(source, 0.0, 0.0), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_loop_with_break_and_continue() {
        let source = "half4 main(float2 p) {
            float sum = 0;
            for (int i = 0; i < 10; i++) {
                if (float(i) >= p.x) { break; }
                if (i == 1) { continue; }
                sum += 1;
            }
            return half4(sum, 0, 0, 1);
        }";
        let program = compile(source);
        assert!(program.dump().contains("continue_op"), "{}", program.dump());
        let colors = run(source, &[Pixel::at(0.0, 0.0), Pixel::at(3.0, 0.0), Pixel::at(20.0, 0.0)]);
        assert_eq!(colors[0][0], 0.0);
        assert_eq!(colors[1][0], 2.0);
        assert_eq!(colors[2][0], 9.0);
    }

    #[test]
    fn test_function_calls_and_out_params() {
        let source = "float twice(float x) { return x * 2; }
        void split(float v, out float lo, out float hi) { lo = v - 1; hi = v + 1; }
        half4 main(float2 p) {
            float lo; float hi;
            split(twice(p.x), lo, hi);
            return half4(lo, hi, 0, 1);
        }";
        assert_eq!(run_at(source, 2.0, 0.0), [3.0, 5.0, 0.0, 1.0]);
    }

    #[test]
    fn test_early_return_uses_return_mask() {
        let source = "float pick(float x) {
            if (x > 1) { return 10; }
            return 20;
        }
        half4 main(float2 p) { return half4(pick(p.x), 0, 0, 1); }";
        let program = compile(source);
        assert!(program.dump().contains("mask_off_return_mask"), "{}", program.dump());
        let colors = run(source, &[Pixel::at(0.0, 0.0), Pixel::at(2.0, 0.0)]);
        assert_eq!(colors[0][0], 20.0);
        assert_eq!(colors[1][0], 10.0);
    }

    #[test]
    fn test_switch_fallthrough_and_default() {
        let source = "half4 main(float2 p) {
            float r = 0;
            switch (int(p.x)) {
                case 0: r = 1; break;
                case 1: r = 2;
                case 2: r += 10; break;
                default: r = 100;
            }
            return half4(r, 0, 0, 1);
        }";
        let pixels: Vec<Pixel> = (0..4).map(|x| Pixel::at(x as f32, 0.0)).collect();
        let colors = run(source, &pixels);
        let reds: Vec<f32> = colors.iter().map(|c| c[0]).collect();
        assert_eq!(reds, vec![1.0, 12.0, 10.0, 100.0]);
    }

    #[test]
    fn test_dynamic_index() {
        let source = "half4 main(float2 p) {
            float a[4] = float[4](1, 2, 3, 4);
            int i = int(p.x);
            a[i] *= 10;
            return half4(a[0], a[1], a[2], a[3]);
        }";
        assert_eq!(run_at(source, 2.0, 0.0), [1.0, 2.0, 30.0, 4.0]);
    }

    #[test]
    fn test_ternary_and_logical_ops() {
        let source = "half4 main(float2 p) {
            bool wide = p.x > 1 && p.y > 1;
            float v = wide ? 1.0 : 0.5;
            return half4(v, p.x > 1 || p.y > 1 ? 1 : 0, 0, 1);
        }";
        let colors = run(source, &[Pixel::at(0.0, 0.0), Pixel::at(2.0, 0.0), Pixel::at(2.0, 2.0)]);
        assert_eq!(colors[0][..2], [0.5, 0.0]);
        assert_eq!(colors[1][..2], [0.5, 1.0]);
        assert_eq!(colors[2][..2], [1.0, 1.0]);
    }

    #[test]
    fn test_struct_equality_and_fields() {
        let source = "struct S { float f; int i; };
        half4 main(float2 p) {
            S a = S(p.x, 3);
            S b = S(2, 3);
            a.i += 1;
            return half4(a == b ? 1 : 0, float(a.i), 0, 1);
        }";
        assert_eq!(run_at(source, 2.0, 0.0), [0.0, 4.0, 0.0, 1.0]);
    }

    #[test]
    fn test_intrinsics() {
        let source = "half4 main(float2 p) {
            float2 v = float2(3, 4);
            return half4(length(v), clamp(p.x, 0, 1), step(0.5, p.y), dot(v, float2(1)));
        }";
        assert_eq!(run_at(source, 7.0, 0.25), [5.0, 1.0, 0.0, 7.0]);
    }

    #[test]
    fn test_matrix_math() {
        let source = "half4 main(float2 p) {
            float2x2 m = float2x2(1, 2, 3, 4);
            float2 v = m * float2(1, 1);
            float d = determinant(m);
            return half4(v, d, 1);
        }";
        assert_eq!(run_at(source, 0.0, 0.0), [4.0, 6.0, -2.0, 1.0]);
    }

    #[test]
    fn test_child_eval_without_callbacks_fails_at_run() {
        let program = compile("uniform shader s; half4 main(float2 p) { return s.eval(p); }");
        assert!(evaluate(&program, 8, None, &[], &[Pixel::at(0.0, 0.0)]).is_err());
    }

    #[test]
    fn test_discard_is_unsupported() {
        let _ = env_logger::builder().is_test(true).try_init();
        let compiler = Compiler::new(ProgramKind::Fragment, Settings::default());
        let result = compiler.compile("void main() { discard; }");
        assert!(matches!(result, Err(CompilerError::Unsupported(_))), "{:?}", result.map(|_| ()));
    }

    #[test]
    fn test_debug_trace_names_slots() {
        let _ = env_logger::builder().is_test(true).try_init();
        let settings = Settings {
            debug_trace: true,
            ..Settings::default()
        };
        let program = Compiler::new(ProgramKind::RuntimeShader, settings)
            .compile("half4 main(float2 p) { float k = p.x; return half4(k); }")
            .expect("compile");
        let trace = program.debug_trace().expect("trace");
        assert_eq!(trace.slot_name(0).as_deref(), Some("p[0]"));
        assert_eq!(trace.func_info[0].name, "half4 main(float2 p)");
        let run = evaluate(&program, 8, None, &[], &[Pixel::at(1.0, 0.0)]).expect("run");
        assert!(!run.trace.is_empty());
    }
}
