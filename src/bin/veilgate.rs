use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use veilgate::{
    ingest_dir, AnchorKind, AnchorStore, Config, Database, Gatekeeper, IdentityVault,
    OllamaEmbedder, OllamaExtractor, RestorationBridge,
};

fn print_usage() {
    eprintln!("Veilgate CLI");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  veilgate sanitize \"<text>\"          tokenize sensitive values in text");
    eprintln!("  veilgate restore \"<text>\"           restore real values for known tokens");
    eprintln!("  veilgate resolve <token>            look a single token up in the vault");
    eprintln!("  veilgate ingest <dir>               sanitize and upload documents in a directory");
    eprintln!("  veilgate query \"<text>\" [--kind document|identity] [--top-k N]");
    eprintln!("  veilgate gc                         drop identity anchors with no vault record");
    eprintln!();
    eprintln!("Configuration via VEILGATE_DB, VEILGATE_OLLAMA_URL,");
    eprintln!("VEILGATE_EXTRACTION_MODEL, VEILGATE_EMBEDDING_MODEL,");
    eprintln!("VEILGATE_SIMILARITY_THRESHOLD, VEILGATE_PLACEHOLDER_ALIASES.");
}

struct App {
    vault: IdentityVault,
    anchors: Arc<AnchorStore>,
    gatekeeper: Gatekeeper,
    bridge: RestorationBridge,
    config: Config,
}

fn build_app() -> Result<App> {
    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data dir {}", parent.display()))?;
    }

    let db = Database::new(config.db_path.clone())
        .with_context(|| format!("Failed to open vault at {}", config.db_path.display()))?;

    let vault = IdentityVault::new(db.clone());
    let embedder = Arc::new(OllamaEmbedder::new(&config));
    let anchors = Arc::new(AnchorStore::new(
        db,
        embedder,
        config.similarity_threshold,
    ));
    let oracle = Arc::new(OllamaExtractor::new(&config));
    let gatekeeper = Gatekeeper::new(oracle, vault.clone(), anchors.clone());
    let bridge = RestorationBridge::new(vault.clone(), config.placeholder_aliases.clone());

    Ok(App {
        vault,
        anchors,
        gatekeeper,
        bridge,
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("veilgate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();

    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        print_usage();
        return Ok(());
    }

    let subcommand = args.remove(0);
    let app = build_app()?;

    match subcommand.as_str() {
        "sanitize" => {
            let text = args.first().context("sanitize requires a text argument")?;
            let outcome = app
                .gatekeeper
                .sanitize(text)
                .await
                .context("Sanitization failed; refusing to emit raw text")?;
            if !outcome.anchored {
                eprintln!("note: semantic anchor was not stored; remote reasoning may degrade");
            }
            println!("{}", outcome.text);
        }
        "restore" => {
            let text = args.first().context("restore requires a text argument")?;
            let report = app.bridge.restore(text)?;
            println!("{}", report.text);
            if !report.unresolved.is_empty() {
                eprintln!("unresolved tokens: {}", report.unresolved.join(", "));
            }
        }
        "resolve" => {
            let token = args.first().context("resolve requires a token argument")?;
            match app.vault.resolve_flexible(token)? {
                Some(record) => println!(
                    "{} -> {} ({})",
                    record.token, record.original_value, record.entity_type
                ),
                None => {
                    eprintln!("token not found: {}", token);
                    std::process::exit(1);
                }
            }
        }
        "ingest" => {
            let dir = args.first().context("ingest requires a directory argument")?;
            let summary = ingest_dir(
                &app.gatekeeper,
                &app.anchors,
                &PathBuf::from(dir),
                app.config.chunk_size,
            )
            .await?;
            println!(
                "ingested {} files into {} chunks",
                summary.files_processed, summary.chunks_stored
            );
            for (path, reason) in &summary.failures {
                eprintln!("skipped {}: {}", path.display(), reason);
            }
        }
        "query" => {
            let text = args.first().cloned().context("query requires a text argument")?;
            let mut kind = None;
            let mut top_k = 3usize;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--kind" => {
                        let value = args.get(i + 1).context("--kind requires a value")?;
                        kind = AnchorKind::parse(value);
                        if kind.is_none() {
                            anyhow::bail!("unknown kind '{}'; use document or identity", value);
                        }
                        i += 2;
                    }
                    "--top-k" => {
                        top_k = args
                            .get(i + 1)
                            .context("--top-k requires a value")?
                            .parse()
                            .context("--top-k must be a number")?;
                        i += 2;
                    }
                    other => anyhow::bail!("unknown flag: {}", other),
                }
            }

            let hits = app.anchors.query_similar(&text, top_k, kind).await?;
            if hits.is_empty() {
                println!("no matches above the similarity threshold");
            }
            for hit in hits {
                println!("{:.3}  {}  {}", hit.score, hit.id, hit.content);
            }
        }
        "gc" => {
            let removed = app.anchors.gc_orphans(&app.vault)?;
            println!("removed {} orphaned anchors", removed);
        }
        other => {
            eprintln!("Unknown subcommand: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
