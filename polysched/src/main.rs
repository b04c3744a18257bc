//! PolySched CLI
//!
//! # Usage
//!
//! ## Schedule a program
//! ```bash
//! polysched schedule --program matmul.json \
//!   --strategy beam --budget 10 --beam-width 4 --candidates 4 \
//!   --seed 7 --cost analytical \
//!   --history history.json --output matmul.c --vectorize
//! ```
//!
//! ## Inspect dependences and loop parallelism
//! ```bash
//! polysched analyze --program matmul.json
//! ```
//!
//! ## Print the program as C
//! ```bash
//! polysched print --program matmul.json
//! ```
//!
//! Log verbosity follows `RUST_LOG`; `--verbose` raises the default to DEBUG.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use polysched::dependency::DependencyModel;
use polysched::pipeline::{AutoScheduler, SchedulerConfig};
use polysched::poly::Extractor;
use polysched::printer::{render_harness, render_kernel};
use polysched::search::StrategyKind;
use polysched::transform::normalize_all;
use polysched::{sync, CostModelKind, Program, ProgramBuilder};

#[derive(Parser)]
#[clap(name = "polysched")]
#[clap(about = "PolySched - Polyhedral auto-scheduling of affine loop programs")]
#[clap(version = "0.1")]
struct Args {
    /// Enable debug logging
    #[clap(long = "verbose", short = 'v', global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for a faster schedule of a program
    Schedule {
        /// Program description (JSON)
        #[clap(long = "program", short = 'p', value_name = "FILE")]
        program: PathBuf,

        /// Scheduler config (JSON); flags below override its fields
        #[clap(long = "config", value_name = "FILE")]
        config: Option<PathBuf>,

        #[clap(long = "strategy", value_enum)]
        strategy: Option<StrategyKind>,

        /// Search rounds
        #[clap(long = "budget")]
        budget: Option<usize>,

        #[clap(long = "beam-width")]
        beam_width: Option<usize>,

        /// Candidates kept between rounds
        #[clap(long = "candidates")]
        candidates: Option<usize>,

        #[clap(long = "seed")]
        seed: Option<u64>,

        #[clap(long = "cost", value_enum)]
        cost: Option<CostModelKind>,

        /// Write the search-history log here
        #[clap(long = "history", value_name = "FILE")]
        history: Option<PathBuf>,

        /// Write the scheduled kernel and timing harness here
        #[clap(long = "output", short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Split loops into hazard-free groups before the final sweep
        #[clap(long = "sync-partition")]
        sync_partition: bool,

        /// Mark dependence-free innermost loops for SIMD
        #[clap(long = "vectorize")]
        vectorize: bool,
    },

    /// Report dependences and per-loop parallelism
    Analyze {
        #[clap(long = "program", short = 'p', value_name = "FILE")]
        program: PathBuf,
    },

    /// Print the program as a C kernel
    Print {
        #[clap(long = "program", short = 'p', value_name = "FILE")]
        program: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Schedule {
            program,
            config,
            strategy,
            budget,
            beam_width,
            candidates,
            seed,
            cost,
            history,
            output,
            sync_partition,
            vectorize,
        } => {
            let mut config = match config {
                Some(path) => SchedulerConfig::from_file(&path)?,
                None => SchedulerConfig::default(),
            };
            if let Some(s) = strategy {
                config.search.strategy = s;
            }
            if let Some(b) = budget {
                config.search.search_budget = b;
            }
            if let Some(w) = beam_width {
                config.search.beam_width = w;
            }
            if let Some(c) = candidates {
                config.search.candidate_size = c;
            }
            if seed.is_some() {
                config.search.seed = seed;
            }
            if let Some(c) = cost {
                config.cost_model = c;
            }
            if history.is_some() {
                config.search.history_log = history;
            }
            config.sync_partition |= sync_partition;
            config.vectorize |= vectorize;
            schedule_command(&program, config, output.as_deref())?;
        }

        Commands::Analyze { program } => analyze_command(&program)?,

        Commands::Print { program } => {
            let program = ProgramBuilder::from_file(&program)?;
            print!("{}", render_kernel(&program, program.name()));
        }
    }

    Ok(())
}

fn schedule_command(
    path: &Path,
    config: SchedulerConfig,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let program = ProgramBuilder::from_file(path)?;
    let kernel = config.process.kernel_name.clone();
    let repetitions = config.process.repetitions;
    let result = AutoScheduler::new(config).run(&program)?;

    println!("Strategy: {}", result.strategy);
    match result.baseline {
        Some(b) => println!("Seed:     {:.4} ms", b),
        None => println!("Seed:     not measured"),
    }
    println!("Best:     {:.4} ms", result.performance);
    if let Some(s) = result.speedup() {
        println!("Speedup:  {:.2}x", s);
    }
    println!();

    match output {
        Some(out) => {
            fs::write(out, render_harness(&result.program, &kernel, repetitions))?;
            println!("Scheduled kernel written to {}", out.display());
        }
        None => print!("{}", render_kernel(&result.program, &kernel)),
    }
    Ok(())
}

fn analyze_command(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut program: Program = ProgramBuilder::from_file(path)?;
    normalize_all(&mut program)?;

    let model = Extractor::extract(&program)?;
    let deps = DependencyModel::analyze(&model)?;
    println!("Statements: {}", model.statements.len());
    for m in deps.maps() {
        let state = if m.is_empty()? { "none" } else { "present" };
        println!("  {}: {}", m.kind(), state);
    }

    println!("Loops:");
    for lp in program.loops() {
        let var = program.loop_node(lp)?.var;
        let parallel = sync::is_parallel(&program, lp)?;
        println!(
            "  {} ({}): {}",
            lp,
            var,
            if parallel { "parallel" } else { "sequential" }
        );
    }
    Ok(())
}
