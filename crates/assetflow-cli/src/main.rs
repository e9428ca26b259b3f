//! assetflow CLI: validate definitions, preview selections, explain plans.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use assetflow_core::config::PlannerConfig;
use assetflow_core::error::{Error as CoreError, GraphError};
use assetflow_core::graph::AssetGraph;
use assetflow_exec::{
    FsIoManager, FsMemoStore, InMemoryIoManager, InMemoryMemoStore, IoManager, IoManagers,
    MemoStore, PlanBuilder, PlanError, PlanManifest,
};
use assetflow_planner::resolve::InputBinding;
use assetflow_planner::{
    parse_queries, parse_yaml_definitions, AssetJob, Definitions, DefinitionsError,
    ResolutionError, SelectionError,
};

#[derive(Parser)]
#[command(name = "assetflow")]
#[command(about = "Select, resolve and plan asset graphs", long_about = None)]
struct Cli {
    /// Log at debug level (otherwise ASSETFLOW_LOG, default warn)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a definitions file: graph, jobs, selections and config
    Validate {
        /// Path to the definitions YAML file
        #[arg(short, long)]
        defs: PathBuf,
    },

    /// Print the asset keys a selection resolves to
    Select {
        /// Path to the definitions YAML file
        #[arg(short, long)]
        defs: PathBuf,

        /// Selection queries, unioned (e.g. `a+`, `*f`, `core/models/b`)
        #[arg(short, long = "select", num_args = 1.., required = true)]
        select: Vec<String>,
    },

    /// Show the execution plan: which steps would run and which are skipped
    Explain {
        /// Path to the definitions YAML file
        #[arg(short, long)]
        defs: PathBuf,

        /// Job defined in the file (default: all assets)
        #[arg(short, long, conflicts_with = "select")]
        job: Option<String>,

        /// Selection queries, unioned
        #[arg(short, long = "select", num_args = 1..)]
        select: Vec<String>,

        /// Partition key to plan for
        #[arg(short, long)]
        partition: Option<String>,

        /// Directory of recorded version tokens (default: empty in-memory store)
        #[arg(long)]
        memo_dir: Option<PathBuf>,

        /// Directory of stored outputs (default: empty in-memory store)
        #[arg(long)]
        io_dir: Option<PathBuf>,

        /// Max concurrent memo lookups (overrides config)
        #[arg(long)]
        max_parallel_lookups: Option<usize>,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
    Yaml,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Definitions(#[from] DefinitionsError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Config(#[from] CoreError),
    #[error("no job named '{0}' in the definitions")]
    UnknownJob(String),
    #[error("output encoding failed: {0}")]
    Encode(String),
}

impl CliError {
    fn suggestions(&self) -> Vec<String> {
        match self {
            CliError::Definitions(e) => e.suggestions(),
            CliError::Graph(e) => e.suggestions(),
            CliError::Selection(e) => ResolutionError::Selection(e.clone()).suggestions(),
            CliError::Resolution(e) => e.suggestions(),
            CliError::Plan(e) => e.suggestions(),
            CliError::Config(e) => e.suggestions(),
            CliError::UnknownJob(_) => vec!["Run `assetflow validate` to list the defined jobs".into()],
            _ => vec![],
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Validate { defs } => validate(&defs),
        Commands::Select { defs, select } => select_keys(&defs, &select),
        Commands::Explain {
            defs,
            job,
            select,
            partition,
            memo_dir,
            io_dir,
            max_parallel_lookups,
            format,
        } => explain(
            &defs,
            job.as_deref(),
            &select,
            partition.as_deref(),
            memo_dir,
            io_dir,
            max_parallel_lookups,
            format,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let suggestions = e.suggestions();
        if !suggestions.is_empty() {
            eprintln!("Suggestions:");
            for s in suggestions {
                eprintln!("  - {}", s);
            }
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("ASSETFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> Result<(Definitions, AssetGraph), CliError> {
    let yaml = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let defs = parse_yaml_definitions(&yaml)?;
    let graph = defs.build_graph()?;
    debug!(
        groups = defs.groups.len(),
        sources = defs.sources.len(),
        jobs = defs.jobs.len(),
        "loaded definitions"
    );
    Ok((defs, graph))
}

fn validate(path: &Path) -> Result<(), CliError> {
    let (defs, graph) = load(path)?;
    let cfg = PlannerConfig::from_env()?;
    for job in &defs.jobs {
        job.resolve_with(&graph, &[], &cfg)?;
    }
    println!("✓ Definitions are valid");
    println!(
        "  {} assets in {} groups, {} sources",
        graph.materializable_keys().len(),
        defs.groups.len(),
        defs.sources.len()
    );
    for job in &defs.jobs {
        println!("  job {}", job.name);
    }
    Ok(())
}

fn select_keys(path: &Path, queries: &[String]) -> Result<(), CliError> {
    let (_, graph) = load(path)?;
    let selection = parse_queries(queries)?;
    for key in selection.resolve(&graph)? {
        println!("{}", key);
    }
    Ok(())
}

/// Every I/O manager key the definitions mention, plus the default.
fn io_manager_keys(defs: &Definitions, cfg: &PlannerConfig) -> BTreeSet<String> {
    let mut keys = BTreeSet::from([cfg.default_io_manager_key.clone()]);
    for group in &defs.groups {
        keys.extend(group.outs.values().filter_map(|o| o.io_manager_key.clone()));
        keys.extend(group.ins.values().filter_map(|i| i.input_manager_key.clone()));
    }
    keys.extend(defs.sources.iter().filter_map(|s| s.io_manager_key.clone()));
    keys
}

#[allow(clippy::too_many_arguments)]
fn explain(
    path: &Path,
    job_name: Option<&str>,
    queries: &[String],
    partition: Option<&str>,
    memo_dir: Option<PathBuf>,
    io_dir: Option<PathBuf>,
    max_parallel_lookups: Option<usize>,
    format: Format,
) -> Result<(), CliError> {
    let (defs, graph) = load(path)?;

    let mut cfg = PlannerConfig::from_env()?;
    if let Some(n) = max_parallel_lookups {
        cfg.max_parallel_lookups = n;
    }
    cfg.validate()?;

    let job = match (job_name, queries.is_empty()) {
        (Some(name), _) => defs
            .job(name)
            .cloned()
            .ok_or_else(|| CliError::UnknownJob(name.to_string()))?,
        (None, false) => AssetJob::new("explain").with_selection(parse_queries(queries)?),
        (None, true) => AssetJob::new("explain"),
    };
    let resolved = job.resolve_with(&graph, &[], &cfg)?;

    let memo: Box<dyn MemoStore> = match memo_dir {
        Some(dir) => Box::new(FsMemoStore::new(dir)),
        None => Box::new(InMemoryMemoStore::new()),
    };
    let mut io = IoManagers::new();
    for key in io_manager_keys(&defs, &cfg) {
        let manager: Arc<dyn IoManager> = match &io_dir {
            Some(dir) if key == cfg.default_io_manager_key => Arc::new(FsIoManager::new(dir.clone())),
            Some(dir) => Arc::new(FsIoManager::new(dir.join(&key))),
            None => Arc::new(InMemoryIoManager::new()),
        };
        io.insert(key, manager);
    }

    let plan = PlanBuilder::new(&graph, memo.as_ref(), &io)
        .with_config(cfg)
        .build(&resolved, partition)?;
    let manifest = PlanManifest::from_plan(&plan)?;

    match format {
        Format::Json => {
            let out = serde_json::to_string_pretty(&manifest).map_err(|e| CliError::Encode(e.to_string()))?;
            println!("{}", out);
        }
        Format::Yaml => {
            let out = serde_yaml::to_string(&manifest).map_err(|e| CliError::Encode(e.to_string()))?;
            print!("{}", out);
        }
        Format::Text => {
            println!("Execution Plan: {}", plan.job);
            println!("==============");
            if let Some(p) = &plan.partition {
                println!("Partition: {}", p);
            }
            println!("Plan hash: {}", manifest.plan_hash.short());
            println!();
            println!("Queued ({}):", plan.steps.len());
            for (i, step) in plan.steps.iter().enumerate() {
                let keys: Vec<String> = step.output_keys().iter().map(|k| k.to_string()).collect();
                let loads = step
                    .inputs
                    .values()
                    .filter(|inp| !matches!(inp.binding, InputBinding::FromStep { .. }))
                    .count();
                println!(
                    "  {}. {} -> [{}] (token {}, {} external inputs)",
                    i + 1,
                    step.identity,
                    keys.join(", "),
                    step.token.map(|t| t.to_string()).unwrap_or_else(|| "unversioned".into()),
                    loads
                );
            }
            println!();
            println!("Skipped ({}):", plan.skipped.len());
            for step in &plan.skipped {
                let keys: Vec<String> = step.output_keys().iter().map(|k| k.to_string()).collect();
                println!("  - {} -> [{}]", step.identity, keys.join(", "));
            }
        }
    }
    Ok(())
}
