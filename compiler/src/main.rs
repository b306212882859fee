use clap::Parser;
use serde::Serialize;

use pulsec::ast::PatternType;
use pulsec::codegen::CodegenOptions;
use pulsec::id::MAX_BUFFERS;
use pulsec::pattern_eval::PatternEvaluator;
use pulsec::samples::SampleRegistry;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Bytecode,
    Sequences,
    Ast,
    Events,
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "pulsec",
    version,
    about = "pulsec — compiles mini-notation patterns to pulse VM bytecode"
)]
struct Cli {
    /// Mini-notation pattern, e.g. "c4 [e4 g4] ~ bd*2"
    pattern: String,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Bytecode)]
    emit: EmitStage,

    /// Compile as an eager `seq` step table instead of a lazy `pat` program
    #[arg(long)]
    seq: bool,

    /// Resolve sample names against the built-in sample registry
    #[arg(long)]
    samples: bool,

    /// Keep oscillators at their base rate even when frequency-modulated
    #[arg(long)]
    no_fm: bool,

    /// Buffer pool capacity
    #[arg(long, default_value_t = MAX_BUFFERS)]
    max_buffers: u16,

    /// Trace compiler phases on stderr
    #[arg(long)]
    verbose: bool,
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("pulsec: error: failed to serialize output: {e}");
            std::process::exit(2);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(std::io::stderr)
            .init();
        eprintln!("pulsec: pattern = {:?}", cli.pattern);
        eprintln!("pulsec: emit    = {:?}", cli.emit);
    }

    let registry = cli.samples.then(SampleRegistry::with_defaults);
    let pattern_type = if cli.seq {
        PatternType::Seq
    } else {
        PatternType::Pat
    };
    let options = CodegenOptions {
        fm_detection: !cli.no_fm,
        max_buffers: cli.max_buffers,
    };

    let program = pulsec::compile_pattern_with(&cli.pattern, pattern_type, registry.as_ref(), options);
    for diag in &program.result.diagnostics {
        eprintln!("pulsec: {diag}");
    }
    if !program.result.success {
        std::process::exit(1);
    }

    if cli.verbose {
        eprintln!(
            "pulsec: {} instructions, {} state inits, {} samples",
            program.result.instructions.len(),
            program.result.state_inits.len(),
            program.result.required_samples.len(),
        );
    }

    match cli.emit {
        EmitStage::Bytecode => {
            for (i, inst) in program.result.instructions.iter().enumerate() {
                println!("{i:4}  {inst}");
            }
        }
        EmitStage::Sequences => print_json(&program.result.state_inits),
        EmitStage::Ast => match program.pattern_root() {
            Some(root) => print_json(&pulsec::ast::mini_tree_json(&program.ast, root)),
            None => {
                eprintln!("pulsec: pattern produced no tree");
                std::process::exit(1);
            }
        },
        EmitStage::Events => match program.pattern_root() {
            Some(root) => {
                let stream = PatternEvaluator::new(&program.ast).evaluate_multi_cycle(root);
                print_json(&stream);
            }
            None => {
                eprintln!("pulsec: pattern produced no tree");
                std::process::exit(1);
            }
        },
        EmitStage::Fingerprint => {
            println!("{}", pulsec::bytecode::fingerprint(&program.result.instructions));
        }
    }
}
