// This binary is a thin shell around the library. It loads the configuration, builds a
// driver that runs tools as local processes and maps each subcommand onto one driver call.
// Compile results are printed as JSON and the process exits with the compiler's code.

//! Command-line front end for the asmview driver.

use std::path::PathBuf;

use asmview::{AsmSyntax, BuildRequest, Driver, DriverConfig};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "asmview")]
#[command(author, version, about = "Inspect compiler output", long_about = None)]
struct Cli {
    /// Driver configuration file
    #[arg(short, long, global = true, default_value = "asmview.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file and print the result as JSON
    Compile(CompileArgs),

    /// List configured compilers
    List {
        /// Only compilers for this instruction set
        #[arg(long)]
        instruction_set: Option<String>,
    },

    /// Check the scheduler and configured tool paths
    Health,
}

#[derive(Args)]
struct CompileArgs {
    /// Compiler id from the configuration
    #[arg(long)]
    compiler: String,

    /// Source file
    source: PathBuf,

    /// Filters to apply (binary, demangle, labels, directives, commentOnly, trim, libraryCode, execute)
    #[arg(short, long, value_delimiter = ',')]
    filter: Vec<String>,

    /// Intel syntax for x86 disassembly
    #[arg(long)]
    intel: bool,

    /// Skip ahead of normal priority jobs
    #[arg(long)]
    high_priority: bool,

    /// Options passed to the compiler
    #[arg(last = true)]
    options: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = DriverConfig::load(&cli.config)?;
    let driver = Driver::with_local_processes(config)?;

    match cli.command {
        Commands::Compile(args) => {
            let source = tokio::fs::read_to_string(&args.source).await?;
            let request = BuildRequest {
                compiler_id: args.compiler,
                source,
                user_options: args.options,
                filters: asmview::Filters::from_names(args.filter.iter().map(String::as_str)),
                asm_syntax: if args.intel {
                    AsmSyntax::Intel
                } else {
                    AsmSyntax::Att
                },
                high_priority: args.high_priority,
            };
            let result = driver.compile(&request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.code != 0 {
                std::process::exit(result.code);
            }
        }
        Commands::List { instruction_set } => {
            for compiler in driver.compilers(instruction_set.as_deref()) {
                println!(
                    "{:<20} {:<10} {}",
                    compiler.id,
                    compiler.instruction_set,
                    compiler.display_name()
                );
            }
        }
        Commands::Health => {
            let report = driver.health_check().await?;
            println!(
                "{} compilers, {} free slots",
                report.compilers, report.available_slots
            );
            for tool in &report.missing_tools {
                println!("missing: {}", tool.display());
            }
            println!("{}", report.message);
        }
    }
    Ok(())
}
