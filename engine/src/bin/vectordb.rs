//! vectordb command-line tool
//!
//! Operates on one workspace directory. Documents are read as JSON lines
//! (`{"id": "...", "embedding": [...], "attributes": {...}}`) from a file or
//! stdin; results are written to stdout as JSON lines.
//!
//! # Usage
//! ```bash
//! # Create a 384-dim cosine workspace and index documents
//! vectordb --workspace ./ws --dimension 384 index docs.jsonl
//!
//! # Dimension and metric are read back from an existing workspace
//! vectordb --workspace ./ws search queries.jsonl --limit 5
//! vectordb --workspace ./ws delete doc-1 doc-2
//!
//! # With verbose logging
//! RUST_LOG=vectordb_engine=debug vectordb --workspace ./ws stats
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use vectordb_engine::{
    logging, metrics, workspace::Workspace, DistanceMetric, Document, HnswVectorDb, OneOrMany,
    VectorDbConfig,
};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VECTORDB_GIT_COMMIT"),
    " ",
    env!("VECTORDB_BUILD_TARGET"),
    ")"
);

#[derive(Parser)]
#[command(name = "vectordb", version = VERSION)]
#[command(about = "Embeddable HNSW vector database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short = 'w', default_value = "./vectordb", help = "Workspace directory")]
    workspace: PathBuf,

    #[arg(long, help = "Embedding dimension (required when creating a workspace)")]
    dimension: Option<usize>,

    #[arg(long, help = "Distance metric: cosine, squared_euclidean or inner_product")]
    metric: Option<DistanceMetric>,

    #[arg(long, short = 'c', help = "Config file (YAML, TOML or JSON)")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Index documents from a JSON-lines file (stdin when omitted)")]
    Index {
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 1000, help = "Documents per logged batch")]
        batch_size: usize,
    },

    #[command(about = "Replace live documents from a JSON-lines file")]
    Update {
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 1000, help = "Documents per logged batch")]
        batch_size: usize,
    },

    #[command(about = "Delete documents by id")]
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    #[command(about = "Search with query documents from a JSON-lines file")]
    Search {
        input: Option<PathBuf>,

        #[arg(long, short = 'k', help = "Matches per query (config default when omitted)")]
        limit: Option<usize>,

        #[arg(long, help = "Comma-separated query embedding instead of an input file")]
        vector: Option<String>,
    },

    #[command(about = "Print one document")]
    Get { id: String },

    #[command(about = "Write a snapshot and compact the log")]
    Snapshot,

    #[command(about = "Print workspace statistics")]
    Stats,

    #[command(about = "Print Prometheus metrics after opening the workspace")]
    Metrics,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = VectorDbConfig::load(cli.config.as_deref())?;
    let _log_guard = logging::init(&config.logging);

    info!(version = VERSION, workspace = %cli.workspace.display(), "vectordb starting");

    let (dimension, metric) = resolve_identity(&cli.workspace, cli.dimension, cli.metric)?;
    let db = HnswVectorDb::open_with_config(&cli.workspace, dimension, metric, config)
        .with_context(|| format!("Failed to open workspace {}", cli.workspace.display()))?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match cli.command {
        Commands::Index { input, batch_size } => {
            let docs = read_documents(input.as_deref())?;
            let mut indexed = 0;
            for chunk in docs.chunks(batch_size.max(1)) {
                indexed += db.index(chunk)?;
            }
            writeln!(out, "{}", serde_json::json!({ "indexed": indexed }))?;
        }

        Commands::Update { input, batch_size } => {
            let docs = read_documents(input.as_deref())?;
            let mut updated = 0;
            for chunk in docs.chunks(batch_size.max(1)) {
                updated += db.update(chunk)?;
            }
            writeln!(out, "{}", serde_json::json!({ "updated": updated }))?;
        }

        Commands::Delete { ids } => {
            let deleted = db.delete_ids(&ids)?;
            writeln!(out, "{}", serde_json::json!({ "deleted": deleted }))?;
        }

        Commands::Search {
            input,
            limit,
            vector,
        } => {
            let limit = limit.unwrap_or(db.config().search.default_limit);
            let queries: OneOrMany<Document> = match vector {
                Some(raw) => OneOrMany::One(Document::new("query", parse_vector(&raw)?)),
                None => OneOrMany::Many(read_documents(input.as_deref())?),
            };
            for result in db.search(queries, limit)?.into_vec() {
                serde_json::to_writer(&mut out, &result)?;
                writeln!(out)?;
            }
        }

        Commands::Get { id } => match db.get(&id) {
            Some(doc) => {
                serde_json::to_writer(&mut out, &doc)?;
                writeln!(out)?;
            }
            None => bail!("document '{}' not found", id),
        },

        Commands::Snapshot => {
            let path = db.create_snapshot()?;
            writeln!(out, "{}", serde_json::json!({ "snapshot": path }))?;
        }

        Commands::Stats => {
            serde_json::to_writer_pretty(&mut out, &db.stats())?;
            writeln!(out)?;
        }

        Commands::Metrics => {
            write!(out, "{}", metrics::render())?;
        }
    }

    out.flush()?;
    db.sync()?;
    Ok(())
}

/// Dimension and metric from the flags, falling back to the workspace's own
/// metadata. A new workspace needs `--dimension`; its metric defaults to cosine.
fn resolve_identity(
    workspace: &Path,
    dimension: Option<usize>,
    metric: Option<DistanceMetric>,
) -> Result<(usize, DistanceMetric)> {
    match Workspace::read_meta(workspace)? {
        Some(meta) => Ok((
            dimension.unwrap_or(meta.dimension),
            metric.unwrap_or(meta.metric),
        )),
        None => {
            let dimension = dimension.with_context(|| {
                format!(
                    "--dimension is required to create workspace {}",
                    workspace.display()
                )
            })?;
            Ok((dimension, metric.unwrap_or_default()))
        }
    }
}

fn read_documents(input: Option<&Path>) -> Result<Vec<Document>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut docs = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line)
            .with_context(|| format!("Invalid document on line {}", line_no + 1))?;
        docs.push(doc);
    }
    Ok(docs)
}

fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    raw.split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid vector component '{}'", v))
        })
        .collect()
}
