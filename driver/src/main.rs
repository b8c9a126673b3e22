use clap::{Args, Parser, Subcommand};
use sksl_core::diags::format_diagnostics;
use sksl_core::rp::{evaluate, Pixel};
use sksl_core::{Compiler, CompilerError, ProgramKind, Settings};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "skslc")]
#[command(about = "Compiles SkSL programs to raster-pipeline stages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Input source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Program kind (fragment, runtime-shader, runtime-color-filter, ...)
    #[arg(short, long, default_value = "runtime-shader")]
    kind: ProgramKind,

    /// JSON file with compiler settings
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Disable constant folding and immutable promotion
    #[arg(long)]
    no_optimize: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file and write the program dump
    Compile {
        #[command(flatten)]
        common: CommonArgs,

        /// Output dump file (defaults to input name with .rp extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Write the debug trace as JSON instead of the dump
        #[arg(long, value_name = "FILE")]
        trace: Option<PathBuf>,
    },

    /// Parse and validate a source file without generating code
    Check {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print the lowered stage list
    Dump {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run the program on the reference pipeline for one pixel
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Local coordinates as X,Y
        #[arg(long, value_delimiter = ',', num_args = 2, default_values_t = [0.0, 0.0])]
        coords: Vec<f32>,

        /// Source color as R,G,B,A
        #[arg(long, value_delimiter = ',', num_args = 4)]
        color: Option<Vec<f32>>,

        /// Destination color as R,G,B,A
        #[arg(long, value_delimiter = ',', num_args = 4)]
        dst: Option<Vec<f32>>,

        /// Uniform values, in declaration order
        #[arg(short, long, value_delimiter = ',')]
        uniforms: Vec<f32>,
    },
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    SettingsError(#[from] serde_json::Error),

    #[error("Compilation error: {0}")]
    CompilationError(#[from] CompilerError),

    #[error("{0}")]
    Reported(String),
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli.command) {
        eprint!("{}", e);
        if !matches!(e, DriverError::Reported(_)) {
            eprintln!();
        }
        std::process::exit(1);
    }
}

fn dispatch(command: Commands) -> Result<(), DriverError> {
    match command {
        Commands::Compile { common, output, trace } => compile_file(&common, output, trace),
        Commands::Check { common } => check_file(&common),
        Commands::Dump { common } => {
            let (_, program) = compile(&common, None)?;
            print!("{}", program.dump());
            Ok(())
        }
        Commands::Run {
            common,
            coords,
            color,
            dst,
            uniforms,
        } => run_file(&common, &coords, color, dst, &uniforms),
    }
}

fn load_settings(common: &CommonArgs) -> Result<Settings, DriverError> {
    let mut settings = match &common.settings {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Settings::default(),
    };
    if common.no_optimize {
        settings.optimize = false;
    }
    Ok(settings)
}

/// Compiles `common.input`, turning user errors into a readable report.
fn compile(common: &CommonArgs, trace: Option<&Path>) -> Result<(Settings, sksl_core::rp::Program), DriverError> {
    let mut settings = load_settings(common)?;
    if trace.is_some() {
        settings.debug_trace = true;
    }
    let source = fs::read_to_string(&common.input)?;
    log::info!("compiling {} as {}", common.input.display(), common.kind.name());
    match Compiler::new(common.kind, settings.clone()).compile(&source) {
        Ok(program) => Ok((settings, program)),
        Err(CompilerError::Diagnostics(diags)) => Err(DriverError::Reported(format_diagnostics(&source, &diags))),
        Err(e) => Err(e.into()),
    }
}

fn compile_file(common: &CommonArgs, output: Option<PathBuf>, trace: Option<PathBuf>) -> Result<(), DriverError> {
    let (_, program) = compile(common, trace.as_deref())?;

    if let Some(trace_path) = trace {
        if let Some(debug_trace) = program.debug_trace() {
            debug_trace.write_trace(fs::File::create(&trace_path)?)?;
            log::info!("wrote debug trace to {}", trace_path.display());
        }
        return Ok(());
    }

    let output_path = output.unwrap_or_else(|| common.input.with_extension("rp"));
    fs::write(&output_path, program.dump())?;
    log::info!(
        "wrote {} instructions ({} value slots) to {}",
        program.instructions().len(),
        program.num_value_slots(),
        output_path.display()
    );
    Ok(())
}

fn check_file(common: &CommonArgs) -> Result<(), DriverError> {
    let settings = load_settings(common)?;
    let source = fs::read_to_string(&common.input)?;
    match Compiler::new(common.kind, settings).check_only(&source) {
        Ok(()) => {
            println!("{} is valid", common.input.display());
            Ok(())
        }
        Err(CompilerError::Diagnostics(diags)) => Err(DriverError::Reported(format_diagnostics(&source, &diags))),
        Err(e) => Err(e.into()),
    }
}

fn rgba(values: Option<Vec<f32>>) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (slot, v) in out.iter_mut().zip(values.unwrap_or_default()) {
        *slot = v;
    }
    out
}

fn run_file(
    common: &CommonArgs,
    coords: &[f32],
    color: Option<Vec<f32>>,
    dst: Option<Vec<f32>>,
    uniforms: &[f32],
) -> Result<(), DriverError> {
    let (settings, program) = compile(common, None)?;
    let (x, y) = (coords.first().copied().unwrap_or(0.0), coords.get(1).copied().unwrap_or(0.0));
    let pixel = match common.kind {
        ProgramKind::RuntimeColorFilter | ProgramKind::RuntimeBlender => Pixel {
            device: [x, y],
            ..Pixel::color(rgba(color), rgba(dst))
        },
        _ => Pixel::at(x, y),
    };
    let output = evaluate(&program, settings.lane_count, None, uniforms, &[pixel])?;
    if let Some([r, g, b, a]) = output.colors.first() {
        println!("half4({}, {}, {}, {})", r, g, b, a);
    }
    Ok(())
}
