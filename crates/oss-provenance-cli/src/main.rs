use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oss_provenance_core::{
    aggregate, build_backends, deps::DependencyAuditor, import_scan_reports, inspect,
    render_aggregate, render_detailed, score_generated_tree, BackendSettings, GenerationDriver,
    GenerationSpec, IssueScanner, LicenseTable, OutputFormat, ProvenanceResolver, ReportWriter,
    ResultStore,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_EXTENSIONS: &[&str] = &["go", "py", "ts"];

#[derive(Parser, Debug)]
#[command(
    name = "oss-provenance",
    author,
    version,
    about = "License and provenance evaluation for LLM-generated code"
)]
struct Cli {
    /// Optional pipeline settings file (TOML or YAML)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate source files with the configured backend pair
    Generate {
        /// Generation spec (overrides `prompt_spec` from settings)
        #[arg(long, value_name = "FILE")]
        spec: Option<PathBuf>,
    },
    /// Score every generated file and store the results
    Similarity,
    /// Import ScanCode reports (`<lang>.json`) into the result store
    ImportScans {
        #[arg(long, value_name = "DIR")]
        scans_dir: Option<PathBuf>,
    },
    /// Aggregate stored results into timestamped CSV reports
    Aggregate {
        /// Emit the statistics as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Per-line issue analysis of generated files
    DetailedReport {
        #[arg(long)]
        json: bool,
    },
    /// Check imports for dependencies with problematic licenses
    AuditDeps {
        /// Directory to scan
        #[arg(default_value = ".")]
        directory: PathBuf,
        /// Show only the summary
        #[arg(long)]
        summary_only: bool,
        /// Write findings to a CSV file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Extra directory names to exclude, comma-separated
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        /// Replacement package table (JSON)
        #[arg(long, value_name = "FILE")]
        table: Option<PathBuf>,
    },
}

/// File-system layout of a pipeline run.
#[derive(Debug, Deserialize)]
struct PipelineSettings {
    generated_dir: PathBuf,
    database: PathBuf,
    scans_dir: PathBuf,
    results_dir: PathBuf,
    prompt_spec: PathBuf,
}

impl PipelineSettings {
    fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("generated_dir", "generated")?
            .set_default("database", "results.sqlite")?
            .set_default("scans_dir", "scans/scancode_output")?
            .set_default("results_dir", "results")?
            .set_default("prompt_spec", "prompts/prompt_spec.yaml")?;
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        builder
            .add_source(config::Environment::with_prefix("OSS_PROVENANCE"))
            .build()
            .context("failed to load pipeline settings")?
            .try_deserialize()
            .context("invalid pipeline settings")
    }

    fn open_store(&self) -> Result<ResultStore> {
        ResultStore::open(&self.database)
            .with_context(|| format!("failed to open result store {}", self.database.display()))
    }

    fn recognized_extensions(&self) -> Vec<String> {
        match GenerationSpec::load(&self.prompt_spec) {
            Ok(spec) => spec.recognized_extensions(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "using default extensions");
                DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    // Backend mode, model ids and credentials may live in a project `.env`.
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            warn!(error = %err, "failed to load .env");
        }
    }
    let config_path = cli.config;
    let settings = || PipelineSettings::load(config_path.as_deref());

    match cli.command {
        Commands::Generate { spec } => generate(&settings()?, spec.as_deref()).await?,
        Commands::Similarity => similarity(&settings()?)?,
        Commands::ImportScans { scans_dir } => import_scans(&settings()?, scans_dir.as_deref())?,
        Commands::Aggregate { json } => aggregate_results(&settings()?, json)?,
        Commands::DetailedReport { json } => detailed_report(&settings()?, json)?,
        Commands::AuditDeps {
            directory,
            summary_only,
            output,
            exclude,
            table,
        } => {
            return audit_deps(
                &directory,
                summary_only,
                output.as_deref(),
                &exclude,
                table.as_deref(),
            )
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn generate(settings: &PipelineSettings, spec_path: Option<&Path>) -> Result<()> {
    let spec_path = spec_path.unwrap_or(&settings.prompt_spec);
    let spec = GenerationSpec::load(spec_path)?;
    let backend_settings = BackendSettings::from_env();
    let backends = build_backends(&backend_settings)?;
    let store = settings.open_store()?;

    let driver = GenerationDriver::new(&backends, &settings.generated_dir, spec.delay()?);
    let summary = driver.run(&spec, &store).await?;
    for (lang, outcome) in &summary.languages {
        println!(
            "{lang}: {generated}/{attempted} generated ({failed} failed)",
            generated = outcome.generated,
            attempted = outcome.attempted,
            failed = outcome.failed
        );
    }
    println!("Generated {} file(s)", summary.total_generated());
    Ok(())
}

fn provenance_resolver<'s>(
    settings: &PipelineSettings,
    store: &'s ResultStore,
) -> ProvenanceResolver<'s> {
    let backend_ids = BackendSettings::from_env().backend_ids();
    ProvenanceResolver::with_store(&settings.generated_dir, backend_ids, store)
}

fn similarity(settings: &PipelineSettings) -> Result<()> {
    let store = settings.open_store()?;
    let resolver = provenance_resolver(settings, &store);
    let records = score_generated_tree(&resolver, &settings.recognized_extensions(), &store)?;
    println!("Similarity analysis complete: {} file(s) scored", records.len());
    Ok(())
}

fn import_scans(settings: &PipelineSettings, scans_dir: Option<&Path>) -> Result<()> {
    let store = settings.open_store()?;
    let resolver = provenance_resolver(settings, &store);
    let scans_dir = scans_dir.unwrap_or(&settings.scans_dir);
    let summary = import_scan_reports(scans_dir, &resolver, &store)?;
    println!(
        "Imported {} report(s): {} file(s), {} detection row(s)",
        summary.reports, summary.files, summary.detections
    );
    for failed in &summary.failed_reports {
        println!("  skipped unreadable report {}", failed.display());
    }
    Ok(())
}

fn aggregate_results(settings: &PipelineSettings, json: bool) -> Result<()> {
    let store = settings.open_store()?;
    let similarity = store.similarity_records()?;
    let licenses = store.license_detections()?;
    let report = aggregate::aggregate(&similarity, &licenses);

    let writer = ReportWriter::new(&settings.results_dir)?;
    let written = aggregate::write_artifacts(&report, &similarity, &licenses, &writer)?;
    let format = if json { OutputFormat::Json } else { OutputFormat::Human };
    print!("{}", render_aggregate(&report, format)?);
    if !json {
        for path in written {
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}

fn detailed_report(settings: &PipelineSettings, json: bool) -> Result<()> {
    let store = settings.open_store()?;
    let resolver = provenance_resolver(settings, &store);
    let scanner = IssueScanner::with_default_rules()?;
    let report = inspect::analyze_generated_tree(&resolver, &scanner, &store)?;
    if report.files.is_empty() {
        println!("No files found for analysis");
        return Ok(());
    }

    let writer = ReportWriter::new(&settings.results_dir)?;
    let written = inspect::write_artifacts(&report, &writer)?;
    let format = if json { OutputFormat::Json } else { OutputFormat::Human };
    print!("{}", render_detailed(&report, format)?);
    if !json {
        for path in written {
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}

fn audit_deps(
    directory: &Path,
    summary_only: bool,
    output: Option<&Path>,
    exclude: &[String],
    table: Option<&Path>,
) -> Result<ExitCode> {
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    let table = match table {
        Some(path) => LicenseTable::load(path)?,
        None => LicenseTable::builtin()?,
    };
    let auditor = DependencyAuditor::new(table, exclude.iter().cloned());

    println!(
        "Scanning {} for dependency license issues...",
        directory.display()
    );
    let report = auditor.audit(directory)?;
    print!("{}", report.render(summary_only)?);

    if let Some(path) = output {
        report.write_csv(path)?;
        println!("\nDetailed report saved to: {}", path.display());
    }
    info!(exit_code = report.exit_code(), "audit finished");
    Ok(ExitCode::from(report.exit_code()))
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
