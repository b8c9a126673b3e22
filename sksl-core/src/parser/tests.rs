use crate::error::CompilerError;
use crate::ir::{ProgramElement, StmtKind};
use crate::{Compiler, ProgramKind, Settings};

fn expect_parse(source: &str) -> crate::ir::Program {
    let _ = env_logger::builder().is_test(true).try_init();
    match Compiler::default().parse(source) {
        Ok(program) => program,
        Err(e) => panic!("unexpected error: {}\n{}", e, source),
    }
}

fn parse_errors(source: &str) -> Vec<String> {
    let _ = env_logger::builder().is_test(true).try_init();
    match Compiler::default().parse(source) {
        Ok(_) => panic!("expected errors for:\n{}", source),
        Err(CompilerError::Diagnostics(diags)) => diags.into_iter().map(|d| d.message).collect(),
        Err(other) => panic!("unexpected error kind: {:?}", other),
    }
}

fn expect_parse_error(source: &str, expected: &str) {
    let errors = parse_errors(source);
    assert!(
        errors.iter().any(|e| e.contains(expected)),
        "expected an error containing {:?}, got {:?}",
        expected,
        errors
    );
}

fn nested_parens(depth: usize) -> String {
    format!(
        "half4 main(float2 p) {{ float x = {}1{}; return half4(x); }}",
        "(".repeat(depth),
        ")".repeat(depth)
    )
}

#[test]
fn test_parse_depth_limit() {
    expect_parse(&nested_parens(20));
    expect_parse_error(&nested_parens(51), "exceeded max parse depth");
}

#[test]
fn test_declaration_or_expression_statement() {
    let program = expect_parse(
        "struct S { float v; };
        half4 main(float2 p) {
            float x = p.x;
            S s;
            s.v = 2;
            x * s.v;
            return half4(x);
        }",
    );
    let main = program.main().expect("main");
    let StmtKind::Block { statements, .. } = &main.body.kind else {
        panic!("main body is not a block");
    };
    assert!(matches!(statements[0].kind, StmtKind::VarDeclaration { .. }));
    assert!(matches!(statements[1].kind, StmtKind::VarDeclaration { .. }));
    assert!(matches!(statements[2].kind, StmtKind::Expression(_)));
}

#[test]
fn test_case_after_default() {
    expect_parse_error(
        "half4 main(float2 p) {
            switch (int(p.x)) { default: break; case 1: break; }
            return half4(0);
        }",
        "expected '}', but found 'case'",
    );
}

#[test]
fn test_description_round_trip() {
    let source = "uniform half4 tint;
    float scale(float v) { return v * 2.0; }
    half4 main(float2 p) {
        float total = 0.0;
        for (int i = 0; i < 3; i++) { total += scale(p.x); }
        if (total > 1.0) { total = 1.0; } else { total = -total; }
        return half4(total) * tint;
    }";
    let first = expect_parse(source).description();
    let second = expect_parse(&first).description();
    assert_eq!(first, second);
}

#[test]
fn test_recursion_rejected() {
    expect_parse_error(
        "float f(float x) { return x > 0 ? f(x - 1) : 0.0; }
        half4 main(float2 p) { return half4(f(p.x)); }",
        "potential recursion",
    );
}

#[test]
fn test_undefined_function() {
    expect_parse_error(
        "float f(float x);
        half4 main(float2 p) { return half4(f(p.x)); }",
        "is not defined",
    );
}

#[test]
fn test_prototype_then_definition() {
    let program = expect_parse(
        "float f(float x);
        half4 main(float2 p) { return half4(f(p.x)); }
        float f(float x) { return x + 1; }",
    );
    let definitions = program
        .elements
        .iter()
        .filter(|e| matches!(e, ProgramElement::Function(_)))
        .count();
    assert_eq!(definitions, 2);
}

#[test]
fn test_reserved_word() {
    expect_parse_error(
        "half4 main(float2 p) { float input = p.x; return half4(input); }",
        "'input' is a reserved word",
    );
}

#[test]
fn test_version_directive() {
    expect_parse("#version 300\nhalf4 main(float2 p) { return half4(0); }");
    expect_parse_error(
        "#version 400\nhalf4 main(float2 p) { return half4(0); }",
        "unsupported version '400'",
    );
    expect_parse_error(
        "half4 main(float2 p) { return half4(0); }\n#version 300\n",
        "'#version' must be the first token in the file",
    );
}

#[test]
fn test_extension_directive() {
    let program = expect_parse("#extension GL_foo : enable\nhalf4 main(float2 p) { return half4(0); }");
    assert!(program
        .elements
        .iter()
        .any(|e| matches!(e, ProgramElement::Extension { name, .. } if name == "GL_foo")));
    expect_parse_error(
        "#extension GL_foo : enable junk\nhalf4 main(float2 p) { return half4(0); }",
        "invalid #extension directive",
    );
}

#[test]
fn test_struct_errors() {
    expect_parse_error(
        "struct S {}; half4 main(float2 p) { return half4(0); }",
        "struct 'S' must contain at least one field",
    );
    expect_parse_error(
        "struct S { float x = 1; }; half4 main(float2 p) { return half4(0); }",
        "initializers are not permitted on struct fields",
    );
}

#[test]
fn test_private_identifiers_need_setting() {
    let source = "half4 main(float2 p) { float $x = 1; return half4($x); }";
    expect_parse_error(source, "'$x' is a reserved word");
    let settings = Settings {
        allow_private_identifiers: true,
        ..Settings::default()
    };
    assert!(Compiler::new(ProgramKind::RuntimeShader, settings).parse(source).is_ok());
}

#[test]
fn test_failed_return_value_reports_once() {
    let sources = [
        "half4 main(float2 p) { return undefined_thing; }",
        "int f() { return 3000000000; } half4 main(float2 p) { return half4(f()); }",
        "half4 main(float2 p) { if (p.x > 0) { return true; } return half4(1); }",
        "half4 main(float2 p) { return true; }",
    ];
    for source in sources {
        let errors = parse_errors(source);
        assert_eq!(errors.len(), 1, "{:?} for {}", errors, source);
        assert!(!errors[0].contains("without returning"), "{:?}", errors);
    }
}
