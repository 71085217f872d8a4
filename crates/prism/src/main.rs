use std::io;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use prism_core::config::{Config, CONFIG_FILE};
use prism_core::{AnalysisPipeline, ExtractorRegistry, ProjectAnalysis};
use prism_cpp::CppExtractor;
use prism_csharp::CSharpExtractor;
use prism_python::PythonExtractor;
use prism_report::check::CheckPolicy;
use prism_report::{json, text, OutputFormat};
use prism_svelte::SvelteExtractor;
use prism_typescript::TypeScriptExtractor;

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "Map structure, dependencies, and call graphs across Python, JS/TS, C++, C#, and Svelte")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a project and print the full report
    Analyze {
        /// Project root or a single file
        path: PathBuf,
        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
        /// Single-line JSON
        #[arg(long)]
        compact: bool,
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Config file path (defaults to .prism.toml in the project or an ancestor)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Reuse cached extraction for unchanged files
        #[arg(long)]
        incremental: bool,
        /// Restrict analysis to these languages (comma separated)
        #[arg(long, value_delimiter = ',')]
        languages: Vec<String>,
    },
    /// Analyze and exit with code 0 (pass) or 1 (fail)
    Check {
        /// Project root or a single file
        path: PathBuf,
        /// Do not fail on dependency cycles
        #[arg(long)]
        allow_cycles: bool,
        /// Fail when dead code candidates exist
        #[arg(long)]
        fail_on_dead_code: bool,
        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Create a default .prism.toml configuration file
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Analyze {
            path,
            format,
            compact,
            output,
            config,
            incremental,
            languages,
        } => cmd_analyze(AnalyzeArgs {
            path: &path,
            format: &format,
            compact,
            output: output.as_deref(),
            config_path: config.as_deref(),
            incremental,
            languages,
        }),
        Commands::Check {
            path,
            allow_cycles,
            fail_on_dead_code,
            format,
            config,
        } => cmd_check(
            &path,
            CheckPolicy {
                allow_cycles,
                fail_on_dead_code,
            },
            &format,
            config.as_deref(),
        ),
        Commands::Init { force } => cmd_init(force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(2);
    }
}

/// Logs go to stderr so stdout stays clean for JSON. `RUST_LOG` overrides the flags.
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

struct AnalyzeArgs<'a> {
    path: &'a Path,
    format: &'a str,
    compact: bool,
    output: Option<&'a Path>,
    config_path: Option<&'a Path>,
    incremental: bool,
    languages: Vec<String>,
}

fn cmd_analyze(args: AnalyzeArgs<'_>) -> Result<()> {
    let format: OutputFormat = args.format.parse()?;
    let mut config = load_config(args.path, args.config_path)?;
    if !args.languages.is_empty() {
        config.project.languages = args.languages;
    }

    let analysis = run_analysis(args.path, config, args.incremental)?;
    let report = match format {
        OutputFormat::Text => text::format_report(&analysis),
        OutputFormat::Json => {
            let mut json = json::format_report(&analysis, args.compact)?;
            json.push('\n');
            json
        }
    };

    match args.output {
        Some(target) => {
            std::fs::write(target, &report)
                .with_context(|| format!("failed to write report to '{}'", target.display()))?;
            info!(path = %target.display(), "report written");
        }
        None => print!("{report}"),
    }
    Ok(())
}

fn cmd_check(path: &Path, policy: CheckPolicy, format: &str, config_path: Option<&Path>) -> Result<()> {
    let format: OutputFormat = format.parse()?;
    let config = load_config(path, config_path)?;
    let analysis = run_analysis(path, config, false)?;

    let (report, passed) = match format {
        OutputFormat::Text => text::format_check(&analysis, policy),
        OutputFormat::Json => {
            let (json, passed) = json::format_check(&analysis, policy, false)?;
            (format!("{json}\n"), passed)
        }
    };
    print!("{report}");
    if !passed {
        process::exit(1);
    }
    Ok(())
}

fn cmd_init(force: bool) -> Result<()> {
    let target = PathBuf::from(CONFIG_FILE);
    if target.exists() && !force {
        anyhow::bail!("{CONFIG_FILE} already exists. Use --force to overwrite.");
    }
    std::fs::write(&target, Config::default_toml())
        .with_context(|| format!("failed to write {CONFIG_FILE}"))?;
    println!("Created {CONFIG_FILE} with default configuration.");
    Ok(())
}

fn load_config(project_path: &Path, config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(p) => Config::load(p),
        None => Ok(Config::load_or_default(project_path)),
    }
}

fn build_registry() -> Result<ExtractorRegistry> {
    Ok(ExtractorRegistry::new()
        .with(Box::new(
            PythonExtractor::new().context("failed to initialize Python extractor")?,
        ))
        .with(Box::new(
            TypeScriptExtractor::new().context("failed to initialize TypeScript extractor")?,
        ))
        .with(Box::new(
            CppExtractor::new().context("failed to initialize C++ extractor")?,
        ))
        .with(Box::new(
            CSharpExtractor::new().context("failed to initialize C# extractor")?,
        ))
        .with(Box::new(
            SvelteExtractor::new().context("failed to initialize Svelte extractor")?,
        )))
}

fn run_analysis(path: &Path, config: Config, incremental: bool) -> Result<ProjectAnalysis> {
    let pipeline = AnalysisPipeline::new(build_registry()?, config);
    debug!(incremental, "starting analysis");
    let analysis = if incremental {
        pipeline.analyze_incremental(path)?
    } else {
        pipeline.analyze(path)?
    };

    if cfg!(debug_assertions) {
        analysis
            .verify_call_symmetry()
            .context("call graph invariant violated")?;
    }
    Ok(analysis)
}
