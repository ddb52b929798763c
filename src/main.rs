mod config;
mod content;
mod error;
mod guard;
mod logging;
mod models;
mod providers;
mod render;
mod service;
mod storage;

use crate::config::{
    db_path, ensure_initialized, get_api_key, load_config, normalize_provider_name, set_api_key,
    AppConfig,
};
use crate::content::{load_page, ContentStore, FileStore, FirestoreStore, Page};
use crate::error::AppError;
use crate::guard::RateGuard;
use crate::models::{QueryRequest, QueryResult};
use crate::service::GuideService;
use crate::storage::Storage;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "wayfarer")]
#[command(about = "AI travel guide and travel-blog content loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    SetKey {
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        provider: Option<String>,
    },
    /// Ask the travel guide one question.
    Ask {
        #[arg(required = true)]
        query: Vec<String>,
        #[arg(long)]
        html: bool,
    },
    /// Answer one question per line read from stdin.
    Chat {
        #[arg(long)]
        html: bool,
    },
    Usage {
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Fill a page template's content regions from the document store.
    BuildSite {
        #[arg(long)]
        template: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Local JSON collections instead of Firestore.
        #[arg(long)]
        content: Option<PathBuf>,
    },
    /// Render completion text from stdin.
    Render {
        #[arg(long)]
        html: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageFormat {
    Text,
    Json,
}

fn validate_usage_format(input: &str) -> Result<UsageFormat, AppError> {
    if input.eq_ignore_ascii_case("text") {
        Ok(UsageFormat::Text)
    } else if input.eq_ignore_ascii_case("json") {
        Ok(UsageFormat::Json)
    } else {
        Err(AppError::Config(
            "Unsupported usage format. Use text or json.".into(),
        ))
    }
}

fn open_guard(cfg: &AppConfig) -> Result<RateGuard, AppError> {
    let storage = Storage::open(&db_path()?)?;
    Ok(RateGuard::open(
        Box::new(storage),
        cfg.limits,
        Local::now().date_naive(),
    ))
}

fn open_service(cfg: &AppConfig) -> Result<GuideService, AppError> {
    let api_key = get_api_key(&cfg.completion.provider)?;
    GuideService::from_config(cfg, api_key, open_guard(cfg)?)
}

fn print_result(
    query: &QueryRequest,
    result: &QueryResult,
    html: bool,
) -> Result<(), AppError> {
    if html {
        println!("{}", render::result_html(query.text(), result)?);
    } else {
        println!("{}", render::result_text(result));
        if let QueryResult::Success {
            tokens_consumed: Some(tokens),
            ..
        } = result
        {
            println!("\n[{tokens} tokens]");
        }
    }
    Ok(())
}

fn content_store(
    cfg: &AppConfig,
    content: Option<PathBuf>,
) -> Result<Box<dyn ContentStore>, AppError> {
    if let Some(path) = content {
        return Ok(Box::new(FileStore::open(&path)?));
    }
    let project_id = cfg.content.project_id.clone().ok_or_else(|| {
        AppError::Config(
            "content.project_id is not set. Configure it or pass --content <FILE>.".into(),
        )
    })?;
    Ok(Box::new(FirestoreStore::new(
        service::http_client()?,
        project_id,
        cfg.content.base_url.clone(),
    )))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let log_level = load_config()
        .map(|c| c.log_level)
        .unwrap_or_else(|_| "warn".into());
    logging::init_tracing(&log_level);

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized wayfarer config and data directories.");
        }
        Commands::SetKey { api_key, provider } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let provider = provider.unwrap_or(cfg.completion.provider);
            set_api_key(&provider, &api_key)?;
            println!(
                "API key for '{}' stored.",
                normalize_provider_name(&provider)
            );
        }
        Commands::Ask { query, html } => {
            let query = QueryRequest::new(&query.join(" "))?;
            ensure_initialized()?;
            let cfg = load_config()?;
            let mut svc = open_service(&cfg)?;
            let result = svc.dispatch(&query).await;
            print_result(&query, &result, html)?;
        }
        Commands::Chat { html } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let mut svc = open_service(&cfg)?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let Ok(query) = QueryRequest::new(&line) else {
                    continue;
                };
                let result = svc.dispatch(&query).await;
                print_result(&query, &result, html)?;
            }
        }
        Commands::Usage { format } => {
            let format = validate_usage_format(&format)?;
            ensure_initialized()?;
            let cfg = load_config()?;
            let usage = open_guard(&cfg)?.snapshot(chrono::Utc::now());
            match format {
                UsageFormat::Json => println!("{}", serde_json::to_string_pretty(&usage)?),
                UsageFormat::Text => {
                    println!(
                        "{}/{} requests in the last minute",
                        usage.requests_last_minute, usage.requests_per_minute
                    );
                    println!("{usage}");
                }
            }
        }
        Commands::BuildSite {
            template,
            out,
            content,
        } => {
            let cfg = load_config()?;
            let store = content_store(&cfg, content)?;
            let mut page = Page::parse(fs::read_to_string(&template)?);
            let report = load_page(store.as_ref(), &mut page).await;
            fs::write(&out, page.render())?;
            println!(
                "Wrote {} ({} regions replaced, {} kept static, {} failed)",
                out.display(),
                report.replaced.len(),
                report.kept_static.len(),
                report.failed.len()
            );
        }
        Commands::Render { html } => {
            let mut raw = String::new();
            tokio::io::stdin().read_to_string(&mut raw).await?;
            let fragments = render::render(&raw);
            if html {
                println!("{}", render::fragments_html(&fragments)?);
            } else {
                for fragment in fragments {
                    println!("{fragment}");
                }
            }
        }
    }

    Ok(())
}
