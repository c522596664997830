use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use biometa_mapper::app::map_use_case::MapUseCase;
use biometa_mapper::app::ports::ReportWriterPort;
use biometa_mapper::app::resolve_use_case::ResolveUseCase;
use biometa_mapper::config::Config;
use biometa_mapper::constants::MAPPED_RECORDS_FILE;
use biometa_mapper::infra::{read_mapped_records, FileReportWriter, JsonlReader, JsonlSink};
use biometa_mapper::logging;
use biometa_mapper::observability::{self, metrics};
use biometa_mapper::pipeline::{MappedRecord, PipelineContext, RunSummary};

#[derive(Parser)]
#[command(name = "biometa-mapper")]
#[command(about = "Maps biodiversity archive metadata into canonical organisms, samples and specimens")]
#[command(version = "0.1.0")]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, default_value = Config::DEFAULT_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter, map, group and resolve in one pass
    Run(RunOptions),
    /// Streaming stages only; writes mapped records as JSON Lines
    Map(RunOptions),
    /// Resolve unique entities from a mapped JSON Lines file
    Resolve(RunOptions),
    /// Print the lineage of a taxon from itself to the root
    Lineage {
        taxon_id: u64,
    },
}

#[derive(Args)]
struct RunOptions {
    /// Input JSON Lines file; overrides the configured records path
    #[arg(long)]
    input: Option<PathBuf>,
    /// Output directory; overrides the configured one
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Process everything but write no files
    #[arg(long)]
    dry_run: bool,
    /// Stop after this many input records
    #[arg(long)]
    max_records: Option<usize>,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Map(_) => "map",
            Commands::Resolve(_) => "resolve",
            Commands::Lineage { .. } => "lineage",
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let _guard = logging::init_logging(&config.outputs.log_dir);

    let metrics_handle = match observability::init() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let command = cli.command.name();
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", run_id = %run_id, command = command);
    let _enter = span.enter();
    let started = Instant::now();

    let (writer, dry_run) = match &cli.command {
        Commands::Run(opts) => run_pipeline(&config, opts, true)?,
        Commands::Map(opts) => run_pipeline(&config, opts, false)?,
        Commands::Resolve(opts) => run_resolve(&config, opts)?,
        Commands::Lineage { taxon_id } => {
            print_lineage(&config, *taxon_id)?;
            return Ok(());
        }
    };

    metrics::run::completed(command, started.elapsed().as_secs_f64());
    if let Some(handle) = metrics_handle {
        writer.write_metrics(&handle.render())?;
    }
    if dry_run {
        println!("Dry run complete; no files written");
    }
    Ok(())
}

fn output_dir(config: &Config, opts: &RunOptions) -> PathBuf {
    opts.output_dir.clone().unwrap_or_else(|| config.outputs.dir.clone())
}

fn run_pipeline(config: &Config, opts: &RunOptions, resolve: bool) -> Result<(FileReportWriter, bool)> {
    let input = opts
        .input
        .clone()
        .or_else(|| config.inputs.records.clone())
        .context("No input records: pass --input or set inputs.records in the config")?;
    let out_dir = output_dir(config, opts);

    let context = PipelineContext::load(config).context("Failed to load mapping tables and taxonomy")?;
    let writer = FileReportWriter::new(&out_dir, opts.dry_run)?;
    let use_case = MapUseCase::new(&context).with_max_records(opts.max_records);

    let mapped_path = out_dir.join(MAPPED_RECORDS_FILE);
    let jsonl = if opts.dry_run {
        JsonlSink::dry_run(&mapped_path)
    } else {
        JsonlSink::create(&mapped_path)?
    };

    info!("Mapping records from {}", input.display());
    let reader = JsonlReader::open(&input)?;

    if resolve {
        let mut sink = (jsonl, Vec::<MappedRecord>::new());
        let summary = use_case.run(reader, &mut sink)?;
        writer.write_run_summary(&summary)?;
        print_summary(&summary, &mapped_path);

        let records = sink.1;
        let reports = ResolveUseCase::new(&context, &writer).resolve(&records)?;
        for report in reports.reports() {
            println!(
                "   {}: {} unique, {} excluded by conflicts",
                report.kind,
                report.included_count(),
                report.excluded_count()
            );
        }
    } else {
        let mut sink = jsonl;
        let summary = use_case.run(reader, &mut sink)?;
        writer.write_run_summary(&summary)?;
        print_summary(&summary, &mapped_path);
    }

    Ok((writer, opts.dry_run))
}

fn run_resolve(config: &Config, opts: &RunOptions) -> Result<(FileReportWriter, bool)> {
    let out_dir = output_dir(config, opts);
    let input = opts.input.clone().unwrap_or_else(|| out_dir.join(MAPPED_RECORDS_FILE));

    let context = PipelineContext::load(config).context("Failed to load mapping tables and taxonomy")?;
    let mut records = read_mapped_records(&input)?;
    if let Some(limit) = opts.max_records {
        records.truncate(limit);
    }
    info!("Resolving {} mapped records from {}", records.len(), input.display());

    let writer = FileReportWriter::new(&out_dir, opts.dry_run)?;
    let reports = ResolveUseCase::new(&context, &writer).resolve(&records)?;
    for report in reports.reports() {
        println!(
            "{}: {} unique, {} excluded by conflicts, {} without a key",
            report.kind,
            report.included_count(),
            report.excluded_count(),
            report.skipped.len()
        );
    }
    Ok((writer, opts.dry_run))
}

fn print_lineage(config: &Config, taxon_id: u64) -> Result<()> {
    let Some(taxonomy) = &config.taxonomy else {
        bail!("No [taxonomy] section configured");
    };
    let index = PipelineContext::load_taxonomy(taxonomy)?;
    for node in index.lineage(taxon_id)? {
        println!("{}\t{}\t{}", node.taxon_id, node.rank, node.scientific_name);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, mapped_path: &Path) {
    println!("\nMapping results:");
    println!("   Records read: {}", summary.records_read);
    println!("   Kept: {}", summary.records_kept);
    println!("   Dropped by filter: {}", summary.records_dropped);
    println!("   Decisions: {}", summary.mapping.decisions.len());
    println!("   Organism groups: {}", summary.grouping.groups.len());
    println!("   Ungrouped: {}", summary.grouping.ungrouped.len());
    println!("   Output file: {}", mapped_path.display());
}
