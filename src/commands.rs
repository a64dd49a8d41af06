//! Command implementations for the `shelf` binary.
//!
//! Each `run_*` function opens what it needs from the config, does one
//! thing, and prints a human-readable summary to stdout.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::fetch::encode_embedded;
use crate::index::{create_gateway, IndexGateway};
use crate::indexer::{IndexReport, Indexer};
use crate::library::{Library, LibraryScope, SqliteLibrary};
use crate::migrate;
use crate::models::{Document, FileType};
use crate::retrieval::RetrievalEngine;

/// Options for `shelf add`.
pub struct AddOptions {
    pub source: String,
    pub owner: String,
    pub title: Option<String>,
    pub session: Option<String>,
    pub file_type: Option<String>,
    pub id: Option<String>,
}

async fn open_library(config: &Config) -> Result<SqliteLibrary> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(SqliteLibrary::new(pool))
}

async fn open_indexer(config: &Config) -> Result<Indexer> {
    let Some(gateway) = create_gateway(&config.index)? else {
        bail!("the index backend is disabled in [index]");
    };
    gateway
        .ensure_schema()
        .await
        .context("Failed to prepare the index")?;
    Indexer::from_config(config, gateway)
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Guess a file type from a path or URL extension.
fn infer_file_type(source: &str) -> FileType {
    let ext = Path::new(source.split(['?', '#']).next().unwrap_or(source))
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => FileType::Pdf,
        Some("txt") | Some("md") | Some("text") => FileType::Text,
        _ => FileType::Other,
    }
}

/// Build the record for `shelf add` without touching the store.
pub fn build_document(opts: &AddOptions) -> Result<Document> {
    let file_type = match &opts.file_type {
        Some(declared) => FileType::from_declared(declared),
        None => infer_file_type(&opts.source),
    };
    let title = opts.title.clone().unwrap_or_else(|| {
        Path::new(&opts.source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("(untitled)")
            .to_string()
    });

    let (embedded_content, storage_url) = if is_remote(&opts.source) {
        (None, Some(opts.source.clone()))
    } else {
        let bytes = std::fs::read(&opts.source)
            .with_context(|| format!("Failed to read {}", opts.source))?;
        (Some(encode_embedded(&bytes)), None)
    };

    Ok(Document {
        id: opts
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        title,
        owner_user_id: opts.owner.clone(),
        file_type,
        embedded_content,
        storage_url,
        session_id: opts.session.clone(),
        timestamp: Some(chrono::Utc::now().to_rfc3339()),
    })
}

pub async fn run_add(config: &Config, opts: AddOptions) -> Result<()> {
    let doc = build_document(&opts)?;
    let library = open_library(config).await?;
    library.add_document(&doc).await?;

    println!("Added document {}", doc.id);
    println!("  title: {}", doc.title);
    println!("  owner: {}", doc.owner_user_id);
    println!("  type:  {}", doc.file_type);
    if let Some(session) = &doc.session_id {
        println!("  session: {}", session);
    }
    Ok(())
}

pub async fn run_remove(config: &Config, id: &str) -> Result<()> {
    let library = open_library(config).await?;
    if !library.remove_document(id).await? {
        bail!("document not found: {}", id);
    }
    println!("Removed document {}", id);

    // Index cleanup is best-effort; the record is already gone.
    if let Some(gateway) = create_gateway(&config.index)? {
        if gateway.delete_document(id).await {
            println!("Removed {} from the index", id);
        } else {
            println!("Warning: could not remove {} from the index", id);
        }
    }
    Ok(())
}

pub async fn run_list(config: &Config, owner: &str, session: Option<String>) -> Result<()> {
    let library = open_library(config).await?;
    let docs = library
        .list_documents(owner, &LibraryScope::from_session(session))
        .await?;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<38} {:<6} TITLE", "ID", "TYPE");
    for doc in &docs {
        println!("{:<38} {:<6} {}", doc.id, doc.file_type.as_str(), doc.title);
    }
    println!();
    println!("{} document(s)", docs.len());
    Ok(())
}

fn print_report(report: &IndexReport) {
    match &report.error {
        Some(error) => println!("{}: not indexed ({})", report.document_id, error),
        None => println!(
            "{}: {} chunk(s), {} indexed, {} failed",
            report.document_id, report.chunks, report.indexed, report.failed
        ),
    }
}

pub async fn run_index(config: &Config, id: &str) -> Result<()> {
    let library = open_library(config).await?;
    let doc = library
        .get_document(id)
        .await?
        .with_context(|| format!("document not found: {}", id))?;

    let indexer = open_indexer(config).await?;
    let report = indexer.index_document(&doc).await;
    print_report(&report);
    Ok(())
}

pub async fn run_deindex(config: &Config, id: &str) -> Result<()> {
    let indexer = open_indexer(config).await?;
    if !indexer.deindex_document(id).await {
        bail!("failed to remove {} from the index", id);
    }
    println!("Removed {} from the index", id);
    Ok(())
}

/// Index the documents of one owner, or of every owner when `owner` is `None`.
pub async fn run_sync(config: &Config, owner: Option<String>, session: Option<String>) -> Result<()> {
    let library = open_library(config).await?;
    let indexer = open_indexer(config).await?;
    let scope = LibraryScope::from_session(session);

    let owners = match owner {
        Some(owner) => vec![owner],
        None => library.owners().await?,
    };

    let mut total = 0;
    let mut incomplete = 0;
    for owner in &owners {
        let reports = indexer.sync_owner(&library, owner, &scope).await?;
        for report in &reports {
            print_report(report);
            if !report.is_complete() {
                incomplete += 1;
            }
        }
        total += reports.len();
    }

    println!();
    println!(
        "Synced {} document(s) for {} owner(s); {} incomplete",
        total,
        owners.len(),
        incomplete
    );
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    owner: &str,
    session: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let library = open_library(config).await?;
    let gateway: Option<Arc<dyn IndexGateway>> = create_gateway(&config.index)?;
    let engine = RetrievalEngine::from_config(config, gateway)?;
    let top_k = limit.unwrap_or(config.retrieval.top_k);

    let results = engine
        .retrieve_library(&library, query, owner, &LibraryScope::from_session(session), top_k)
        .await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, result.score, result.title);
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        if result.partial {
            println!("    (document still being read; later pages not searched yet)");
        }
        println!("    id: {}", result.chunk_id);
        println!();
    }
    Ok(())
}
