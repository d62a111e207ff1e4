use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docqa_core::config::DEFAULT_CONFIG_FILE;
use docqa_core::{
    AppContext, ClearRequest, ClearState, EmbedderKind, IndexBackend, IngestOutcome,
    SearchOutcome, Settings,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docqa", version, about = "Ask questions against your PDF and text documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "DOCQA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the index and upload cache
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    embedder: Option<EmbedderArg>,

    #[arg(long, global = true, value_enum)]
    index_backend: Option<BackendArg>,

    /// Qdrant base URL
    #[arg(long, global = true)]
    qdrant_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderArg {
    Minilm,
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Local,
    Qdrant,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest .pdf/.txt files, or every one of them under a folder.
    Ingest {
        files: Vec<PathBuf>,
        /// Folder scanned recursively.
        #[arg(long, conflicts_with = "files")]
        folder: Option<PathBuf>,
    },
    /// Ask a question and print the most relevant passages.
    Search {
        query: String,
        /// Number of passages to look up (clamped to the configured maximum).
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the number of stored chunks.
    Count,
    /// Print every stored chunk.
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Delete every stored chunk.
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let config = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut settings = Settings::load(Some(&config))
            .with_context(|| format!("failed to load settings from {}", config.display()))?;

        if let Some(data_root) = &self.data_root {
            settings.data_root = data_root.clone();
        }
        if let Some(embedder) = self.embedder {
            settings.embedder = match embedder {
                EmbedderArg::Minilm => EmbedderKind::Minilm,
                EmbedderArg::Ngram => EmbedderKind::Ngram,
            };
        }
        if let Some(backend) = self.index_backend {
            settings.index_backend = match backend {
                BackendArg::Local => IndexBackend::Local,
                BackendArg::Qdrant => IndexBackend::Qdrant,
            };
        }
        if let Some(url) = &self.qdrant_url {
            settings.qdrant.url = url.clone();
        }
        Ok(settings)
    }
}

fn relevance_band(similarity_percentage: f64) -> &'static str {
    if similarity_percentage >= 80.0 {
        "high"
    } else if similarity_percentage >= 60.0 {
        "moderate"
    } else {
        "low"
    }
}

fn describe(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Indexed {
            fingerprint,
            chunk_count,
        } => format!("{}: {chunk_count} chunks indexed", fingerprint.filename),
        IngestOutcome::Replaced {
            fingerprint,
            chunk_count,
            removed,
        } => format!(
            "{}: replaced {removed} old chunks with {chunk_count} new ones",
            fingerprint.filename
        ),
        IngestOutcome::Skipped { filename, reason } => format!("{filename}: skipped, {reason}"),
    }
}

async fn ingest_files(context: &AppContext, files: &[PathBuf]) -> anyhow::Result<()> {
    let ingestor = context.ingestor();
    let mut failures = 0;

    for path in files {
        match ingestor.ingest_file(path).await {
            Ok(outcome) => println!("{}", describe(&outcome)),
            Err(error) => {
                failures += 1;
                warn!(path = %path.display(), %error, "ingest failed");
                println!("{}: failed, {error}", path.display());
            }
        }
    }

    if failures == files.len() {
        bail!("none of the {} file(s) could be ingested", files.len());
    }
    Ok(())
}

async fn ingest_folder(context: &AppContext, folder: &Path) -> anyhow::Result<()> {
    let report = context.ingestor().ingest_folder(folder).await?;

    for outcome in &report.outcomes {
        println!("{}", describe(outcome));
    }
    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
        println!("{}: failed, {}", skipped.path.display(), skipped.reason);
    }

    println!(
        "{} chunks ingested from {} at {}",
        report.chunk_count(),
        folder.display(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    match outcome {
        SearchOutcome::Advisory(advisory) => println!("{}", advisory.message),
        SearchOutcome::Results(hits) => {
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "#{} {:.2}% ({} relevance) {} chunk {}",
                    rank + 1,
                    hit.similarity_percentage,
                    relevance_band(hit.similarity_percentage),
                    hit.metadata.filename,
                    hit.metadata.chunk_index
                );
                println!("{}\n", hit.text);
            }
        }
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn clear(context: &AppContext, yes: bool) -> anyhow::Result<()> {
    let mut request = ClearRequest::new();
    request.advance(context.index()).await?;

    let total = context.total_chunks().await?;
    if !yes && !confirm(&format!("Delete all {total} stored chunks? This cannot be undone."))? {
        request.cancel();
        println!("clear cancelled");
        return Ok(());
    }

    if request.advance(context.index()).await? == ClearState::Executed {
        println!("{total} chunks deleted");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_root = %settings.data_root.display(),
        "docqa boot"
    );
    let context = AppContext::from_settings(settings).await?;

    match cli.command {
        Command::Ingest { files, folder } => match folder {
            Some(folder) => ingest_folder(&context, &folder).await?,
            None if files.is_empty() => bail!("pass one or more files, or --folder <dir>"),
            None => ingest_files(&context, &files).await?,
        },
        Command::Search { query, top_k, json } => {
            let engine = context.retrieval();
            let top_k = top_k.unwrap_or(engine.options().default_top_k);
            let outcome = engine.search(&query, top_k).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
        }
        Command::Count => println!("{}", context.total_chunks().await?),
        Command::List { json } => {
            let chunks = context.list_chunks().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for chunk in &chunks {
                    println!(
                        "{} ({} words, hash {})",
                        chunk.id, chunk.metadata.word_count, chunk.metadata.file_hash
                    );
                }
                println!("{} chunks", chunks.len());
            }
        }
        Command::Clear { yes } => clear(&context, yes).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_bands_follow_thresholds() {
        assert_eq!(relevance_band(95.0), "high");
        assert_eq!(relevance_band(80.0), "high");
        assert_eq!(relevance_band(79.99), "moderate");
        assert_eq!(relevance_band(60.0), "moderate");
        assert_eq!(relevance_band(10.0), "low");
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::try_parse_from([
            "docqa",
            "search",
            "what is the pump pressure",
            "--top-k",
            "5",
            "--embedder",
            "ngram",
        ])
        .expect("parses");

        assert!(matches!(cli.embedder, Some(EmbedderArg::Ngram)));
        assert!(matches!(
            cli.command,
            Command::Search { top_k: Some(5), json: false, .. }
        ));
    }

    #[test]
    fn folder_and_files_are_exclusive() {
        assert!(Cli::try_parse_from(["docqa", "ingest", "a.txt", "--folder", "docs"]).is_err());
        assert!(Cli::try_parse_from(["docqa", "ingest", "--folder", "docs"]).is_ok());
    }

    #[test]
    fn skipped_outcome_reads_naturally() {
        let outcome = IngestOutcome::Skipped {
            filename: "a.txt".to_string(),
            reason: docqa_core::DuplicateReason::AlreadyIndexed,
        };
        assert_eq!(
            describe(&outcome),
            "a.txt: skipped, this exact document is already indexed"
        );
    }
}
