//! novel-ingest - Turn EPUB files into novel-shelf chapters

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use epub_ingest::{
    AssetSink, Chapter, IngestConfig, NoopSink, ParseSettings, ParsedBook, Response, StoreSink,
    UploadRequest, UploadService, parse_local,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use shelf_store::{Language, LocalObjectStore, StoreConfig, get_backend};
use std::path::{Path, PathBuf};

const TOKEN_ENV: &str = "NOVEL_SHELF_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "novel-ingest")]
#[command(about = "Parse EPUB files into chapters and upload them to the novel shelf", long_about = None)]
#[command(version)]
struct Args {
    /// Enable debug output
    #[arg(short, long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse an EPUB locally without touching the record store
    Parse {
        /// Path to the EPUB file
        file: PathBuf,

        /// Print the parsed book as JSON (full chapter content)
        #[arg(long)]
        json: bool,

        /// Copy images into this directory and rewrite chapter links to it
        #[arg(long)]
        assets_dir: Option<PathBuf>,
    },
    /// Parse an EPUB and store its chapters for a novel
    Upload {
        /// Path to the EPUB file
        file: PathBuf,

        /// Target novel id
        #[arg(long)]
        novel_id: String,

        /// Content language (en, id)
        #[arg(long)]
        language: Option<String>,

        /// Access token (default: $NOVEL_SHELF_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Storage backend from store.toml
        #[arg(long)]
        backend: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set the default storage backend
    SetBackend {
        /// Backend name as declared in store.toml
        name: String,
    },
    /// Set the default content language
    SetLanguage {
        /// Language code (en, id)
        code: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    match args.command {
        Commands::Parse {
            file,
            json,
            assets_dir,
        } => run_parse(&file, json, assets_dir).await,
        Commands::Upload {
            file,
            novel_id,
            language,
            token,
            backend,
        } => run_upload(&file, &novel_id, language, token, backend).await,
        Commands::Config { action } => handle_config_command(&action),
    }
}

fn read_epub(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        anyhow::bail!("EPUB file not found: {}", path.display());
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// JSON shape of a local parse
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LocalBook<'a> {
    title: &'a str,
    author: &'a str,
    description: &'a str,
    chapters: &'a [Chapter],
    cover_url: Option<&'a str>,
}

async fn run_parse(path: &Path, as_json: bool, assets_dir: Option<PathBuf>) -> Result<()> {
    let bytes = read_epub(path)?;
    let config = IngestConfig::load().context("Failed to load configuration")?;
    let settings = ParseSettings::from(&config);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let local_store = assets_dir.map(|dir| LocalObjectStore::new(dir, None));
    let store_sink = local_store.as_ref().map(|store| StoreSink::new(store));
    let sink: &dyn AssetSink = match &store_sink {
        Some(sink) => sink,
        None => &NoopSink,
    };

    let book = parse_local(&bytes, &stem, sink, &settings)
        .await
        .context("Failed to parse EPUB")?;

    if as_json {
        let output = LocalBook {
            title: &book.metadata.title,
            author: &book.metadata.author,
            description: &book.metadata.description,
            chapters: &book.chapters,
            cover_url: book.cover_url.as_deref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&book);
    }

    Ok(())
}

fn print_summary(book: &ParsedBook) {
    println!("Title: {}", book.metadata.title);
    println!("Author: {}", book.metadata.author);
    if !book.metadata.description.is_empty() {
        println!("Description: {}", book.metadata.description);
    }
    if !book.package.from_container {
        println!("Package: {} (container.xml missing, used fallback)", book.package.path);
    }
    println!("Mode: {:?}", book.mode);
    println!(
        "Chapters: {} (skipped: {} short, {} missing, {} non-HTML)",
        book.chapters.len(),
        book.stats.too_short,
        book.stats.missing,
        book.stats.non_html
    );
    for chapter in &book.chapters {
        println!(
            "  {:>3}. {} ({} chars, {} images)",
            chapter.number,
            chapter.title,
            chapter.content.chars().count(),
            chapter.images.len()
        );
    }
    if let Some(url) = &book.cover_url {
        println!("Cover: {}", url);
    }
}

async fn run_upload(
    path: &Path,
    novel_id: &str,
    language: Option<String>,
    token: Option<String>,
    backend_name: Option<String>,
) -> Result<()> {
    let bytes = read_epub(path)?;
    let config = IngestConfig::load().context("Failed to load configuration")?;
    let store_config = StoreConfig::load().context("Failed to load store configuration")?;
    let settings = ParseSettings::from(&config);
    let default_language = Language::from_code(&config.default_language)
        .context("Invalid default_language in configuration")?;

    let name = store_config.backend_or_default(backend_name.as_deref());
    let backend_config = store_config.get_backend(name)?;
    let backend = get_backend(name, backend_config)
        .with_context(|| format!("Failed to initialise backend '{}'", name))?;

    let token = token
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .ok_or_else(|| anyhow::anyhow!("No access token. Pass --token or set {}", TOKEN_ENV))?;

    let service = UploadService::for_backend(&backend, settings, default_language);

    eprintln!("Uploading {} to novel {} ({})", path.display(), novel_id, name);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chapters {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let request = UploadRequest {
        authorization: Some(format!("Bearer {}", token)),
        epub: Some(bytes),
        novel_id: Some(novel_id.to_string()),
        language,
    };
    let report = service
        .process_with_progress(request, |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        })
        .await;
    pb.finish_and_clear();
    let report = report.context("Upload failed")?;

    eprintln!(
        "Stored {} chapters ({} new, {} updated, {} failed)",
        report.chapters_count, report.inserted, report.updated, report.failed
    );
    let response = Response::ok(&report);
    println!("{}", serde_json::to_string_pretty(&response.body)?);

    if report.failed > 0 {
        anyhow::bail!("{} chapters could not be stored", report.failed);
    }
    Ok(())
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = IngestConfig::load()?;
            println!("Configuration file: {:?}", IngestConfig::config_path()?);
            println!();
            println!("min_chapter_chars = {}", config.min_chapter_chars);
            println!("preview_chars = {}", config.preview_chars);
            println!("default_language = \"{}\"", config.default_language);
            println!("fallback_package_path = \"{}\"", config.fallback_package_path);

            let store_config = StoreConfig::load()?;
            println!();
            println!("Store file: {:?}", StoreConfig::config_path()?);
            println!("default_backend = \"{}\"", store_config.default_backend);
            let mut names: Vec<&String> = store_config.backends.keys().collect();
            names.sort();
            for name in names {
                println!("  [{}] kind = {}", name, store_config.backends[name].kind);
            }
        }
        ConfigAction::SetBackend { name } => {
            let mut store_config = StoreConfig::load()?;
            store_config.get_backend(name)?;
            store_config.default_backend = name.clone();
            store_config.save()?;
            println!("Default backend set to: {}", name);
        }
        ConfigAction::SetLanguage { code } => {
            let language = Language::from_code(code)?;
            let mut config = IngestConfig::load()?;
            config.default_language = language.code().to_string();
            config.save()?;
            println!("Default language set to: {}", config.default_language);
        }
    }
    Ok(())
}
