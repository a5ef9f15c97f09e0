use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use lithograph::emit::{sanitize_identifier, Composer, EmitterRegistry};
use lithograph::ir::Graph;
use lithograph::pipeline::{self, PassSpec, Pipeline};
use lithograph::transform::PassRegistry;
use lithograph::{export, frontend};

#[derive(Parser)]
#[command(
    name = "litho",
    version,
    about = "Compile inference graphs to C++ for embedded runtimes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a graph manifest to C++ artifacts
    Build {
        /// Input graph manifest (.json)
        input: PathBuf,
        /// Output directory for generated files
        #[arg(short, long, default_value = "models")]
        output: PathBuf,
        /// Run these passes instead of the stock pipeline (repeatable, in order)
        #[arg(long = "pass", value_name = "SPEC")]
        passes: Vec<String>,
        /// Run no transform passes
        #[arg(long)]
        no_default_passes: bool,
        /// Override the model name used in generated code and file names
        #[arg(long, value_name = "NAME")]
        model_name: Option<String>,
        /// Annotate generated code with per-node markers
        #[arg(long)]
        debug_comments: bool,
        /// Keep weight arrays in the source file instead of a weights header
        #[arg(long)]
        embed_weights: bool,
        /// Save the transformed graph as a manifest
        #[arg(long, value_name = "PATH")]
        save_graph: Option<PathBuf>,
        /// What to emit: cpp, binary or both
        #[arg(long, default_value = "cpp")]
        target: String,
    },
    /// Export a transformed graph as a binary model file
    Export {
        /// Input graph manifest (.json)
        input: PathBuf,
        /// Output .lgm file (default: <input>.lgm)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Run these passes instead of the stock pipeline (repeatable, in order)
        #[arg(long = "pass", value_name = "SPEC")]
        passes: Vec<String>,
        /// Run no transform passes
        #[arg(long)]
        no_default_passes: bool,
    },
    /// Print the contents of a binary model file
    Inspect {
        /// Input .lgm file
        input: PathBuf,
        /// Also dump buffer contents as hex
        #[arg(long)]
        buffers: bool,
    },
    /// List the available transform passes
    Passes,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Build {
            input,
            output,
            passes,
            no_default_passes,
            model_name,
            debug_comments,
            embed_weights,
            save_graph,
            target,
        } => cmd_build(
            input,
            output,
            passes,
            no_default_passes,
            model_name,
            debug_comments,
            embed_weights,
            save_graph,
            &target,
        ),
        Command::Export {
            input,
            output,
            passes,
            no_default_passes,
        } => cmd_export(input, output, passes, no_default_passes),
        Command::Inspect { input, buffers } => cmd_inspect(input, buffers),
        Command::Passes => cmd_passes(),
    }
}

// --- litho build ---

#[allow(clippy::too_many_arguments)]
fn cmd_build(
    input: PathBuf,
    output: PathBuf,
    passes: Vec<String>,
    no_default_passes: bool,
    model_name: Option<String>,
    debug_comments: bool,
    embed_weights: bool,
    save_graph: Option<PathBuf>,
    target: &str,
) {
    let (emit_cpp, emit_binary) = match target {
        "cpp" => (true, false),
        "binary" => (false, true),
        "both" => (true, true),
        other => {
            eprintln!(
                "error: unknown target '{}' (expected cpp, binary or both)",
                other
            );
            process::exit(1);
        }
    };

    let graph = load_graph(&input);
    let specs = resolve_passes(&passes, no_default_passes);
    let graph = run_passes(graph, &specs);

    if let Some(ref path) = save_graph {
        if let Err(e) = frontend::save_manifest(&graph, path) {
            eprintln!("error: {}", e);
            process::exit(1);
        }
        eprintln!("Saved graph -> {}", path.display());
    }

    if emit_cpp {
        let mut composer = Composer::new()
            .with_debug_comments(debug_comments)
            .with_split_weights(!embed_weights);
        if let Some(ref name) = model_name {
            composer = composer.with_model_name(name);
        }
        let registry = EmitterRegistry::with_builtins();
        let artifacts = match composer.compose(&graph, &registry) {
            Ok(a) => a,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
        let written = match artifacts.write_to(&output) {
            Ok(w) => w,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
        for path in &written {
            eprintln!("Generated -> {}", path.display());
        }
    }

    if emit_binary {
        let bytes = match export::export(&graph) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
        if let Err(e) = std::fs::create_dir_all(&output) {
            eprintln!("error: cannot create '{}': {}", output.display(), e);
            process::exit(1);
        }
        let stem = sanitize_identifier(model_name.as_deref().unwrap_or_else(|| graph.name()));
        let out_path = output.join(format!("{}.lgm", stem));
        if let Err(e) = std::fs::write(&out_path, &bytes) {
            eprintln!("error: cannot write '{}': {}", out_path.display(), e);
            process::exit(1);
        }
        eprintln!("Exported -> {} ({} bytes)", out_path.display(), bytes.len());
    }
}

// --- litho export ---

fn cmd_export(
    input: PathBuf,
    output: Option<PathBuf>,
    passes: Vec<String>,
    no_default_passes: bool,
) {
    let graph = load_graph(&input);
    let specs = resolve_passes(&passes, no_default_passes);
    let graph = run_passes(graph, &specs);

    let bytes = match export::export(&graph) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let out_path = output.unwrap_or_else(|| input.with_extension("lgm"));
    if let Err(e) = std::fs::write(&out_path, &bytes) {
        eprintln!("error: cannot write '{}': {}", out_path.display(), e);
        process::exit(1);
    }
    eprintln!("Exported -> {} ({} bytes)", out_path.display(), bytes.len());
}

// --- litho inspect ---

fn cmd_inspect(input: PathBuf, buffers: bool) {
    let bytes = match std::fs::read(&input) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.display(), e);
            process::exit(1);
        }
    };
    let model = match export::decode(&bytes) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    println!("model:       {}", model.name);
    println!("fingerprint: {}", model.fingerprint.to_hex());
    println!("operators:   {}", model.operators.len());
    println!("tensors:     {}", model.tensors.len());
    println!("buffers:     {}", model.buffers.len());

    println!("\nop codes:");
    for (code, name) in model.op_codes.iter().enumerate() {
        println!("  [{}] {}", code, name);
    }

    println!("\ntensors:");
    for (i, tensor) in model.tensors.iter().enumerate() {
        let shape = match &tensor.shape {
            Some(dims) => format!("{:?}", dims),
            None => "?".to_string(),
        };
        let mut line = format!("  [{}] {} {} {}", i, tensor.name, tensor.dtype, shape);
        if let Some((min, max)) = tensor.quant {
            line.push_str(&format!("  range [{}, {}]", min, max));
        }
        if let Some(buffer) = tensor.buffer {
            line.push_str(&format!("  buffer {}", buffer));
        }
        println!("{}", line);
    }

    // Indices were bounds-checked during decode.
    let names = |indices: &[u32]| -> Vec<&str> {
        indices
            .iter()
            .map(|&i| model.tensors[i as usize].name.as_str())
            .collect()
    };

    println!("\noperators:");
    for (i, op) in model.operators.iter().enumerate() {
        println!(
            "  [{}] {} {:?} -> {:?}",
            i,
            model.op_codes[op.op_code as usize],
            names(&op.inputs),
            names(&op.outputs)
        );
    }

    println!("\ninputs:  {:?}", names(&model.inputs));
    println!("outputs: {:?}", names(&model.outputs));

    if buffers {
        println!("\nbuffers:");
        for (i, buf) in model.buffers.iter().enumerate() {
            println!("  [{}] {} byte(s)", i, buf.len());
            for chunk in buf.chunks(16) {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                println!("      {}", hex.join(" "));
            }
        }
    }
}

// --- litho passes ---

fn cmd_passes() {
    let registry = PassRegistry::with_builtins();
    for (name, description) in registry.list() {
        println!("  {:<12} {}", name, description);
    }

    let stock: Vec<String> = pipeline::default_passes()
        .iter()
        .map(|s| s.to_string())
        .collect();
    println!("\ndefault pipeline: {}", stock.join(", "));
}

// --- Helpers ---

fn load_graph(path: &Path) -> Graph {
    match frontend::load_manifest(path) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

/// The pass list to run: `--pass` specs replace the stock pipeline
/// entirely; `--no-default-passes` alone means no passes.
fn resolve_passes(passes: &[String], no_default: bool) -> Vec<PassSpec> {
    if !passes.is_empty() {
        match pipeline::parse_pass_specs(passes) {
            Ok(specs) => return specs,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
    }
    if no_default {
        Vec::new()
    } else {
        pipeline::default_passes()
    }
}

fn run_passes(graph: Graph, specs: &[PassSpec]) -> Graph {
    let registry = PassRegistry::with_builtins();
    let pipeline = match Pipeline::from_specs(&registry, specs) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    match pipeline.run(graph) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}
