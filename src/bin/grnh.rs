use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use grn_hierarchy::config::{ConfigLoader, ResolvedConfig};
use grn_hierarchy::csv_build::{BuildPlan, ExitSignal, HierarchyBuilder};
use grn_hierarchy::domain::GroupMode;
use grn_hierarchy::error::{ErrorClass, GenomeError};
use grn_hierarchy::legacy::LegacyReport;
use grn_hierarchy::report::{self, JsonOutput};
use grn_hierarchy::source::GenomeSource;
use grn_hierarchy::xml;

#[derive(Parser)]
#[command(name = "grnh")]
#[command(about = "Inspect, repair and build gene-regulatory network model hierarchies")]
#[command(version, author)]
struct Cli {
    /// Config file; defaults to grnh.json, then the user config directory.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Overrides the configured group mode.
    #[arg(long, global = true, value_enum)]
    group_mode: Option<GroupMode>,

    /// Single-line JSON output.
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List every model, root first, parents before children")]
    Models(FileArgs),
    #[command(about = "Apply legacy repairs and report consistency problems")]
    Check(CheckArgs),
    #[command(about = "Classify links landing on a gene against its cis-regulatory modules")]
    Modules(ModulesArgs),
    #[command(about = "Show launch and landing pad needs of a node across all models")]
    Pads(PadsArgs),
    #[command(about = "Materialize one dynamic model")]
    Dynamic(DynamicArgs),
    #[command(about = "Build models from a CSV description")]
    Build(BuildArgs),
}

#[derive(Args)]
struct FileArgs {
    /// Hierarchy file (.xml or .xml.gz).
    file: PathBuf,
}

#[derive(Args)]
struct CheckArgs {
    file: PathBuf,

    /// Save the repaired hierarchy back to the same file.
    #[arg(long)]
    write: bool,
}

#[derive(Args)]
struct ModulesArgs {
    file: PathBuf,
    gene: String,
}

#[derive(Args)]
struct PadsArgs {
    file: PathBuf,
    node: String,
}

#[derive(Args)]
struct DynamicArgs {
    file: PathBuf,
    proxy: String,

    #[arg(long)]
    hour: Option<i32>,
}

#[derive(Args)]
struct BuildArgs {
    csv: PathBuf,

    /// Existing hierarchy to extend; a fresh one is started otherwise.
    #[arg(long)]
    into: Option<PathBuf>,

    /// Where to save the result.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GenomeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GenomeError) -> u8 {
    match error.class() {
        ErrorClass::Fatal => 1,
        ErrorClass::DataFormat => 2,
        ErrorClass::Infeasible => 3,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(mode) = cli.group_mode {
        config.group_mode = mode;
    }
    if cli.compact {
        config.pretty = false;
    }

    match cli.command {
        Commands::Models(args) => {
            let (source, _) = load(&args.file, &config)?;
            print(&report::models_report(&source)?, &config)
        }
        Commands::Check(args) => {
            let (source, legacy) = load(&args.file, &config)?;
            let mut check = report::check_report(&source, &legacy)?;
            if args.write {
                xml::write_hierarchy(&source, &args.file)?;
                check.written = Some(args.file.display().to_string());
            }
            print(&check, &config)
        }
        Commands::Modules(args) => {
            let (source, _) = load(&args.file, &config)?;
            print(&report::modules_report(&source, &args.gene)?, &config)
        }
        Commands::Pads(args) => {
            let (source, _) = load(&args.file, &config)?;
            print(&report::pads_report(&source, &args.node)?, &config)
        }
        Commands::Dynamic(args) => {
            let (source, _) = load(&args.file, &config)?;
            print(&report::dynamic_report(&source, &args.proxy, args.hour)?, &config)
        }
        Commands::Build(args) => run_build(args, &config),
    }
}

fn load(path: &Path, config: &ResolvedConfig) -> Result<(GenomeSource, LegacyReport), GenomeError> {
    let (mut source, legacy) = if config.legacy_fixup {
        xml::read_hierarchy(path)?
    } else {
        (xml::read_hierarchy_as_written(path)?, LegacyReport::default())
    };
    source.set_settings(config.source_settings());
    Ok((source, legacy))
}

fn run_build(args: BuildArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let text = std::fs::read_to_string(&args.csv)
        .map_err(|err| GenomeError::Io {
            path: args.csv.clone(),
            message: err.to_string(),
        })?;
    let plan = BuildPlan::parse(&text)?;
    let mut source = match &args.into {
        Some(path) => load(path, config)?.0,
        None => {
            let mut source = GenomeSource::new("bioTapA", "Full Genome");
            source.set_settings(config.source_settings());
            source
        }
    };
    let build = HierarchyBuilder::new(&mut source, ExitSignal::new()).apply(&plan)?;
    if let Some(output) = &args.output {
        if !build.cancelled {
            xml::write_hierarchy(&source, output)?;
            info!(output = %output.display(), "build saved");
        }
    }
    print(&build.summary(), config)
}

fn print<T: serde::Serialize>(value: &T, config: &ResolvedConfig) -> miette::Result<()> {
    JsonOutput::print(value, config.pretty).into_diagnostic()
}
