use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use lantern_core::{DistanceMetric, PoolConfig};
use lantern_pinecone::{
    create_from_pinecone, BulkImporter, CreateIndex, Lantern, MigrationOptions, PineconeClient,
};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lantern", version, about = "Manage lantern vector indexes", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "LANTERN_DB_URL")]
    db_url: String,

    /// Upper bound on pooled connections (probed from the server when unset)
    #[arg(long, env = "LANTERN_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Per-statement timeout in milliseconds
    #[arg(long, env = "LANTERN_STATEMENT_TIMEOUT_MS")]
    statement_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List index names
    List,
    /// Create an index
    Create {
        name: String,
        #[arg(long)]
        dimension: usize,
        #[arg(long, default_value = "cosine")]
        metric: String,
        #[arg(long, default_value_t = 12)]
        m: u32,
        #[arg(long, default_value_t = 64)]
        ef: u32,
        #[arg(long, default_value_t = 64)]
        ef_construction: u32,
        /// Register the index without building its default namespace
        #[arg(long)]
        no_init: bool,
    },
    /// Drop an index with all of its namespaces
    Delete { name: String },
    /// Show index description
    Describe { name: String },
    /// Show per-namespace vector counts
    Stats { name: String },
    /// Copy a Pinecone index into a new lantern index
    ImportPinecone {
        name: String,
        #[arg(long, env = "PINECONE_API_KEY")]
        api_key: String,
        #[arg(long, env = "PINECONE_ENVIRONMENT")]
        environment: String,
        /// Namespace for --ids
        #[arg(long, default_value = "")]
        namespace: String,
        /// Copy only these ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long)]
        recreate: bool,
        /// Skip building the HNSW and metadata indexes after the copy
        #[arg(long)]
        skip_index: bool,
        #[arg(long)]
        workers: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PoolConfig::new(cli.db_url);
    if let Some(n) = cli.max_connections {
        config = config.max_size(n);
    }
    if let Some(ms) = cli.statement_timeout_ms {
        config = config.statement_timeout(Duration::from_millis(ms));
    }
    let lantern = Lantern::connect(config)?;

    match cli.command {
        Commands::List => {
            for name in lantern.list_indexes()? {
                println!("{name}");
            }
        }
        Commands::Create {
            name,
            dimension,
            metric,
            m,
            ef,
            ef_construction,
            no_init,
        } => {
            let metric = DistanceMetric::parse(&metric)?;
            lantern.create_index(
                &CreateIndex::new(&name, dimension, metric)
                    .hnsw(Some(m), Some(ef), Some(ef_construction))
                    .init_index(!no_init),
            )?;
            println!("created {name}");
        }
        Commands::Delete { name } => {
            lantern.delete_index(&name)?;
            println!("deleted {name}");
        }
        Commands::Describe { name } => {
            let description = lantern.describe_index(&name)?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Commands::Stats { name } => {
            let stats = lantern.index(&name)?.describe_index_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::ImportPinecone {
            name,
            api_key,
            environment,
            namespace,
            ids,
            recreate,
            skip_index,
            workers,
        } => {
            let source = PineconeClient::connect(&api_key, &environment, &name)?;
            info!(index = %name, environment = %environment, "importing from pinecone");
            let mut options = MigrationOptions::new(&name);
            options.namespace = namespace;
            options.ids = ids;
            options.recreate = recreate;
            options.create_lantern_index = !skip_index;
            if let Some(workers) = workers {
                options.importer = BulkImporter::default().workers(workers);
            }
            let start = Instant::now();
            let migration = create_from_pinecone(&lantern, &source, &options)?;
            let report = &migration.report;
            println!(
                "copied {} vectors in {} batches ({:.2?})",
                report.copied,
                report.batches,
                start.elapsed()
            );
            if !report.is_complete() {
                for failure in &report.failures {
                    eprintln!(
                        "failed batch in namespace '{}' starting at {} ({} ids): {}",
                        failure.namespace, failure.first_id, failure.size, failure.error
                    );
                }
                bail!("{} batches failed", report.failures.len());
            }
        }
    }

    lantern.close();
    Ok(())
}
