use sksl_core::rp::stages::{ColorRegisters, HostStage};
use sksl_core::rp::{evaluate, Callbacks, Pipeline, Pixel, Stage};
use sksl_core::{Compiler, CompilerError, ProgramKind, Settings};

fn compile(kind: ProgramKind, settings: Settings, source: &str) -> sksl_core::rp::Program {
    let _ = env_logger::builder().is_test(true).try_init();
    match Compiler::new(kind, settings).compile(source) {
        Ok(program) => program,
        Err(e) => panic!("compile failed: {}\n{}", e, source),
    }
}

fn shader(source: &str) -> sksl_core::rp::Program {
    compile(ProgramKind::RuntimeShader, Settings::default(), source)
}

fn unoptimized() -> Settings {
    Settings {
        optimize: false,
        ..Settings::default()
    }
}

fn row(count: usize) -> Vec<Pixel> {
    (0..count).map(|i| Pixel::at(i as f32, 0.0)).collect()
}

/// Child shader that returns its coordinates as a color and a filter that
/// swaps red and blue.
struct TestChildren;

impl Callbacks for TestChildren {
    fn append_shader(&mut self, index: usize, pipeline: &mut dyn Pipeline) -> bool {
        if index != 0 {
            return false;
        }
        pipeline.append(Stage::Host(HostStage::new("coords_as_color", |regs: &mut ColorRegisters| {
            for lane in 0..regs.src[0].len() {
                regs.src[2][lane] = 0.0;
                regs.src[3][lane] = 1.0;
            }
        })));
        true
    }

    fn append_color_filter(&mut self, _index: usize, pipeline: &mut dyn Pipeline) -> bool {
        pipeline.append(Stage::Host(HostStage::new("swap_rb", |regs: &mut ColorRegisters| {
            for lane in 0..regs.src[0].len() {
                let red = regs.src[0][lane];
                regs.src[0][lane] = regs.src[2][lane];
                regs.src[2][lane] = red;
            }
        })));
        true
    }

    fn append_blender(&mut self, _index: usize, _pipeline: &mut dyn Pipeline) -> bool {
        false
    }

    fn to_linear_srgb(&mut self, _pipeline: &mut dyn Pipeline) {}

    fn from_linear_srgb(&mut self, _pipeline: &mut dyn Pipeline) {}
}

#[test]
fn test_gradient_over_many_batches() {
    let program = shader("half4 main(float2 p) { return half4(p.x / 16, 0, 1 - p.x / 16, 1); }");
    let colors = evaluate(&program, 4, None, &[], &row(17)).unwrap().colors;
    assert_eq!(colors.len(), 17);
    assert_eq!(colors[0], [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(colors[8], [0.5, 0.0, 0.5, 1.0]);
    assert_eq!(colors[16], [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_optimized_and_unoptimized_agree() {
    let source = "uniform float scale;
        float ramp(float v) { return clamp(v * scale - 1.0, 0.0, 4.0); }
        half4 main(float2 p) {
            const float k = 2.0 * 3.0;
            float3 v = float3(1, 2, 3) * k;
            int n = int(p.x);
            float acc = 0;
            for (int i = 0; i < 4; i++) {
                if (i == n) { continue; }
                acc += v[i % 3] - float(i);
            }
            return half4(ramp(acc), acc, float(n * 7 % 5), 1);
        }";
    let fast = shader(source);
    let slow = compile(ProgramKind::RuntimeShader, unoptimized(), source);
    let pixels = row(5);
    let a = evaluate(&fast, 8, None, &[0.5], &pixels).unwrap().colors;
    let b = evaluate(&slow, 8, None, &[0.5], &pixels).unwrap().colors;
    for (x, y) in a.iter().zip(&b) {
        for c in 0..4 {
            assert_eq!(x[c].to_bits(), y[c].to_bits(), "{:?} vs {:?}", a, b);
        }
    }
}

#[test]
fn test_vector_uniforms() {
    let program = shader(
        "uniform half4 tint;
        uniform float2 offset;
        half4 main(float2 p) { return tint * half4(p + offset, 1, 1); }",
    );
    assert_eq!(program.num_uniform_slots(), 6);
    let uniforms = [1.0, 0.5, 2.0, 1.0, 1.0, 2.0];
    let colors = evaluate(&program, 8, None, &uniforms, &[Pixel::at(3.0, 0.0)]).unwrap().colors;
    assert_eq!(colors[0], [4.0, 1.0, 2.0, 1.0]);
}

#[test]
fn test_missing_uniforms_read_as_zero() {
    let program = shader("uniform float2 offset; half4 main(float2 p) { return half4(offset, 0, 1); }");
    let colors = evaluate(&program, 8, None, &[3.0], &[Pixel::at(0.0, 0.0)]).unwrap().colors;
    assert_eq!(colors[0], [3.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_color_filter_kind() {
    let program = compile(
        ProgramKind::RuntimeColorFilter,
        Settings::default(),
        "half4 main(half4 color) { return color.bgra * 0.5; }",
    );
    let pixel = Pixel::color([1.0, 0.5, 0.0, 1.0], [0.0; 4]);
    let colors = evaluate(&program, 8, None, &[], &[pixel]).unwrap().colors;
    assert_eq!(colors[0], [0.0, 0.25, 0.5, 0.5]);
}

#[test]
fn test_blender_kind_reads_dst() {
    let program = compile(
        ProgramKind::RuntimeBlender,
        Settings::default(),
        "half4 main(half4 src, half4 dst) { return mix(dst, src, src.a); }",
    );
    let pixel = Pixel::color([1.0, 0.0, 0.0, 0.25], [0.0, 0.0, 1.0, 1.0]);
    let colors = evaluate(&program, 8, None, &[], &[pixel]).unwrap().colors;
    assert_eq!(colors[0], [0.25, 0.0, 0.75, 0.8125]);
}

#[test]
fn test_child_effects_through_callbacks() {
    let program = shader(
        "uniform shader child;
        uniform colorFilter swap;
        half4 main(float2 p) { return swap.eval(child.eval(p * 2)); }",
    );
    let dump = program.dump();
    assert!(dump.contains("invoke_shader 0"), "{}", dump);
    assert!(dump.contains("invoke_color_filter 1"), "{}", dump);
    let mut children = TestChildren;
    let colors = evaluate(&program, 8, Some(&mut children), &[], &[Pixel::at(1.0, 3.0)])
        .unwrap()
        .colors;
    assert_eq!(colors[0], [0.0, 6.0, 2.0, 1.0]);
}

#[test]
fn test_rejected_child_is_an_error() {
    let program = shader("uniform blender b; half4 main(float2 p) { return b.eval(half4(1), half4(0)); }");
    let mut children = TestChildren;
    assert!(evaluate(&program, 8, Some(&mut children), &[], &[Pixel::at(0.0, 0.0)]).is_err());
}

#[test]
fn test_frag_coord_reads_device_position() {
    let program = shader("half4 main(float2 p) { return half4(sk_FragCoord.xy, p.x, 1); }");
    let pixel = Pixel {
        device: [10.0, 20.0],
        ..Pixel::at(1.0, 2.0)
    };
    let colors = evaluate(&program, 8, None, &[], &[pixel]).unwrap().colors;
    assert_eq!(colors[0], [10.0, 20.0, 1.0, 1.0]);
}

#[test]
fn test_nested_control_flow_per_lane() {
    let program = shader(
        "half4 main(float2 p) {
            int n = int(p.x);
            float total = 0;
            for (int i = 0; i < 10; i++) {
                if (i >= n) { break; }
                switch (i) {
                    case 0: total += 1; break;
                    case 1: total += 10;
                    default: total += 100;
                }
            }
            return half4(total, 0, 0, 1);
        }",
    );
    let reds: Vec<f32> = evaluate(&program, 8, None, &[], &row(4))
        .unwrap()
        .colors
        .iter()
        .map(|c| c[0])
        .collect();
    assert_eq!(reds, vec![0.0, 1.0, 111.0, 211.0]);
}

#[test]
fn test_es2_restrictions() {
    let source = "half4 main(float2 p) { float x = 0; while (x < p.x) { x += 1; } return half4(x); }";
    let es2 = Settings {
        enforce_es2_restrictions: true,
        ..Settings::default()
    };
    match Compiler::new(ProgramKind::RuntimeShader, es2).compile(source) {
        Err(CompilerError::Diagnostics(diags)) => {
            assert!(diags.iter().any(|d| d.message.contains("while loops are not supported")), "{:?}", diags);
        }
        other => panic!("expected diagnostics, got {:?}", other.map(|_| ())),
    }
    let colors = evaluate(&shader(source), 8, None, &[], &[Pixel::at(2.5, 0.0)]).unwrap().colors;
    assert_eq!(colors[0][0], 3.0);
}

#[test]
fn test_trace_round_trips_through_json() {
    let settings = Settings {
        debug_trace: true,
        ..Settings::default()
    };
    let program = compile(
        ProgramKind::RuntimeShader,
        settings,
        "half4 main(float2 p) {\n    float2 q = p * 2;\n    return half4(q, 0, 1);\n}",
    );
    let trace = program.debug_trace().expect("trace requested");
    let mut bytes = Vec::new();
    trace.write_trace(&mut bytes).unwrap();
    let restored = sksl_core::rp::DebugTrace::read_trace(bytes.as_slice()).unwrap();
    assert_eq!(&restored, trace);
    assert!(restored.slot_info.iter().any(|s| s.name == "q"));
    let run = evaluate(&program, 8, None, &[], &[Pixel::at(1.0, 1.0)]).unwrap();
    assert_eq!(run.colors[0], [2.0, 2.0, 0.0, 1.0]);
}
