//! initsafe CLI
//!
//! Main entry point for the `initsafe` command.

use clap::{Parser, Subcommand};
use initsafe::{CheckerConfig, Reporter, SourceFile};
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "initsafe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Initialization safety checker for class hierarchies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the classes of a source file
    Check {
        /// Input file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Configuration file (defaults to initsafe.toml next to the input)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Only check these classes
        #[arg(long = "class", value_name = "NAME")]
        classes: Vec<String>,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,

        /// Show the parsed AST
        #[arg(long)]
        show_ast: bool,
    },

    /// Show information about the checker
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "initsafe=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Check {
            input,
            config,
            classes,
            json,
            show_ast,
        } => check(&input, config.as_deref(), classes, json, show_ast),

        Commands::Info => info(),
    }
}

fn load_config(input: &Path, explicit: Option<&Path>) -> Result<CheckerConfig> {
    match explicit {
        Some(path) => CheckerConfig::load(path).into_diagnostic(),
        None => {
            let dir = input.parent().unwrap_or_else(|| Path::new("."));
            CheckerConfig::discover(dir).into_diagnostic()
        }
    }
}

fn check(
    input: &Path,
    config_path: Option<&Path>,
    classes: Vec<String>,
    json: bool,
    show_ast: bool,
) -> Result<()> {
    tracing::info!("Checking {:?}", input);

    let source_content = std::fs::read_to_string(input)
        .map_err(|e| miette::miette!("Failed to read input file: {}", e))?;
    let source_file = SourceFile::new(input.to_string_lossy().to_string(), source_content.clone());

    let mut config = load_config(input, config_path)?;
    if !classes.is_empty() {
        config.classes = classes;
    }

    let tokens = initsafe::lexer::lex(&source_content)?;
    tracing::debug!("Lexed {} tokens", tokens.len());

    let program = initsafe::parser::parse(&tokens, &source_content)?;
    tracing::debug!("Parsed {} classes", program.classes.len());

    if show_ast {
        let ast = serde_json::to_string_pretty(&program)
            .map_err(|e| miette::miette!("Failed to serialize AST: {}", e))?;
        println!("{}", ast);
    }

    let report = initsafe::init::check_program(&program, &config);

    if json {
        let out = serde_json::to_string_pretty(&report.to_json())
            .map_err(|e| miette::miette!("Failed to serialize report: {}", e))?;
        println!("{}", out);
    } else {
        let mut reporter = Reporter::new(source_file);
        for class_report in &report.reports {
            reporter.class_report(class_report);
        }
        for fault in &report.faults {
            reporter.fault(&fault.class, &fault.fault);
        }
        reporter.emit_all();

        println!(
            "Checked {} class(es): {} warning(s), {} error(s)",
            report.reports.len() + report.faults.len(),
            reporter.warning_count(),
            reporter.error_count()
        );
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(miette::miette!(
            "{} initialization effect(s), {} aborted class check(s)",
            report.effect_count(),
            report.faults.len()
        ))
    }
}

fn info() -> Result<()> {
    println!("initsafe {}", initsafe::VERSION);
    println!();
    println!("Reports:");
    println!("  init::uninitialized_access   field read before its initializer ran");
    println!("  init::not_yet_assigned       field read through a receiver that lacks it");
    println!("  init::cold_access            field read on an object of unknown state");
    println!("  init::cold_call              method called on an object of unknown state");
    println!("  init::unknown_call_target    call whose body cannot be analyzed");
    println!("  init::override_risk          overridable method called during construction");
    println!("  init::leaked_argument        partially built object passed as an argument");
    println!("  init::leaked_assignment      partially built object stored in a field");
    println!("  init::escaping_closure       closure over `this` escapes during construction");
    println!();
    println!("Member modifiers: final, private, lazy, abstract, @init, @partial");
    Ok(())
}
