//! Spatial analysis agent CLI
//!
//! Runs one natural-language request end to end:
//! - Loads tool documentation into the operation catalog
//! - Reads dataset summaries and locations from a JSON manifest
//! - Executes the synthesized workflow in a subprocess sandbox
//!
//! Ctrl-C cancels the run.

use anyhow::{Context, Result};
use clap::Parser;
use sa_core::{AgentSettings, DataContext, Request};
use sa_pipeline::{
    DataCollaborator, ManifestCollaborator, Orchestrator, ProcessSandbox,
};
use sa_tools::{InMemoryCatalog, OperationCatalog};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "spatial-agent")]
#[command(about = "Turn a spatial analysis request into an executed geoprocessing workflow")]
struct Args {
    /// The analysis request, in plain language
    goal: String,

    /// JSON manifest of available datasets
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Directory of TOML tool documentation
    #[arg(long)]
    tool_docs: Option<PathBuf>,

    /// Backend profile, e.g. gpt-4o or gpt-5.1
    #[arg(short, long)]
    backend: Option<String>,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug attempts after the first execution
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Skip the review stage
    #[arg(long)]
    no_review: bool,

    /// Root directory for run artifacts
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Print the full run result as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, mut settings: AgentSettings) -> AgentSettings {
        if let Some(backend) = &self.backend {
            settings = settings.with_backend(backend.clone());
        }
        if let Some(max) = self.max_attempts {
            settings = settings.with_max_attempts(max);
        }
        if self.no_review {
            settings = settings.with_review(false);
        }
        if let Some(dir) = &self.workspace {
            settings = settings.with_workspace_dir(dir.clone());
        }
        if let Some(dir) = &self.tool_docs {
            settings.tool_docs_dir = Some(dir.clone());
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/spatial-agent/environment (if exists)
    sa_core::config::load_environment();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spatial_agent=info".parse()?)
                .add_directive("sa_pipeline=info".parse()?)
                .add_directive("sa_llm=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = args.apply(AgentSettings::load(args.config.as_deref())?);
    settings.validate()?;

    let timeouts = settings.timeouts();
    let router = Arc::new(
        sa_llm::default_router()
            .with_effort(settings.effort)
            .with_timeout(timeouts.backend),
    );
    router.check(&settings.backend)?;

    // --- Catalog ---
    let catalog: Arc<dyn OperationCatalog> = match &settings.tool_docs_dir {
        Some(dir) => Arc::new(
            InMemoryCatalog::from_dir(dir)
                .await
                .with_context(|| format!("loading tool documentation from {}", dir.display()))?,
        ),
        None => {
            warn!("No tool documentation directory configured, catalog is empty");
            Arc::new(InMemoryCatalog::new())
        }
    };
    info!(tools = catalog.len().await, "Initialized operation catalog");

    // --- Data ---
    let manifest = match &args.manifest {
        Some(path) => Some(Arc::new(ManifestCollaborator::from_file(path)?)),
        None => None,
    };
    let data = match &manifest {
        Some(m) => m.summaries().await?,
        None => DataContext::default(),
    };
    info!(datasets = data.datasets.len(), "Loaded data context");

    // --- Orchestrator ---
    let sandbox = Arc::new(ProcessSandbox::new(settings.sandbox()));
    let mut orchestrator = Orchestrator::new(catalog, router, sandbox, settings);
    if let Some(m) = manifest {
        orchestrator = orchestrator.with_data_collaborator(m);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let request = Request::new(args.goal.clone(), data);
    let result = orchestrator.run(&request, cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.summary.trim_end());
    }

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
