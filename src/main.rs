use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use subscout::{
    classifier::Bucket,
    config::Config,
    fetcher::{BoundedFetcher, FetchOutcome, HttpFetcher},
    links,
    pipeline::{ClassificationPipeline, RelayValidationPipeline, StageStats, ValidationRun},
    relay::TargetFormat,
    report::SubscriptionSet,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "subscout",
    about = "Find, classify and relay-check proxy subscription links"
)]
struct Args {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract links from documents and classify what they serve
    Classify {
        /// Channel whose public preview page is scanned too (repeatable)
        #[arg(long = "channel")]
        channels: Vec<String>,
        /// Documents to scan; stdin when neither files nor channels are given
        files: Vec<PathBuf>,
    },
    /// Check subscription URLs through the conversion relays
    Validate {
        /// Relay target format (clash, loon, v2ray, ...)
        #[arg(long, default_value = "clash")]
        target: TargetFormat,
        /// Files listing URLs; stdin when omitted
        files: Vec<PathBuf>,
    },
    /// Extract, classify, merge with stored subscriptions, then relay-check every bucket
    Run {
        /// Sub-store text from an earlier run; its entries are re-checked and merged
        #[arg(long)]
        existing: Option<PathBuf>,
        /// Write the merged sub-store text here
        #[arg(long)]
        sub_store_out: Option<PathBuf>,
        /// Channel whose public preview page is scanned too (repeatable)
        #[arg(long = "channel")]
        channels: Vec<String>,
        /// Documents to scan; stdin when neither files nor channels are given
        files: Vec<PathBuf>,
    },
}

#[derive(Serialize)]
struct ClassifyReport {
    extracted: usize,
    classified: StageStats,
    cancelled: bool,
    subscriptions: SubscriptionSet,
}

#[derive(Serialize)]
struct RunReport {
    #[serde(flatten)]
    classification: ClassifyReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    revalidated: Option<StageStats>,
    merged: SubscriptionSet,
    /// Per-bucket change of the merged set against the stored one.
    changes: BTreeMap<&'static str, i64>,
    confirmed: BTreeMap<Bucket, ValidationRun>,
    sub_store: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = Config::from_env()?;

    let cancel = CancellationToken::new();
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal, returning partial results...");
        shutdown_token.cancel();
    });

    let output = match args.command {
        Command::Classify { channels, files } => {
            let documents = gather_documents(&config, &files, &channels).await?;
            let report = classify(&config, &documents, &cancel).await?;
            serde_json::to_string_pretty(&report)?
        }
        Command::Validate { target, files } => {
            let urls = links::extract_unique(read_documents(&files)?, &[] as &[&str]);
            let run = RelayValidationPipeline::new(config)
                .validate_all_until(urls, &target, &cancel)
                .await?;
            serde_json::to_string_pretty(&run)?
        }
        Command::Run {
            existing,
            sub_store_out,
            channels,
            files,
        } => {
            let documents = gather_documents(&config, &files, &channels).await?;
            let classification = classify(&config, &documents, &cancel).await?;

            let stored = match &existing {
                Some(path) => SubscriptionSet::from_sub_store(&read_file(path)?),
                None => SubscriptionSet::new(),
            };
            let (merged, revalidation) = ClassificationPipeline::new(config.clone())
                .merge_with_stored(&stored, &classification.subscriptions, &cancel)
                .await?;
            let revalidated = existing.is_some().then_some(revalidation.stats);
            let changes = merged.diff_counts(&stored);

            let sub_store = merged.render_sub_store();
            if let Some(path) = &sub_store_out {
                std::fs::write(path, &sub_store)
                    .with_context(|| format!("Failed to write '{}'", path.display()))?;
            }

            let relay = RelayValidationPipeline::new(config.clone());
            let mut confirmed = BTreeMap::new();
            for bucket in Bucket::ALL {
                let urls = merged.bucket(bucket);
                if urls.is_empty() || cancel.is_cancelled() {
                    continue;
                }
                let target = TargetFormat::from(bucket.target_format());
                let run = relay
                    .validate_all_until(urls.iter().cloned(), &target, &cancel)
                    .await?;
                confirmed.insert(bucket, run);
            }

            serde_json::to_string_pretty(&RunReport {
                classification,
                revalidated,
                merged,
                changes,
                confirmed,
                sub_store,
            })?
        }
    };

    println!("{}", output);
    Ok(())
}

async fn classify(
    config: &Config,
    documents: &[String],
    cancel: &CancellationToken,
) -> Result<ClassifyReport> {
    let candidates: BTreeSet<String> = links::extract_unique(documents, config.link_denylist());
    info!(documents = documents.len(), extracted = candidates.len(), "links extracted");

    let run = ClassificationPipeline::new(config.clone())
        .classify_all_until(candidates.iter().cloned(), cancel)
        .await?;

    Ok(ClassifyReport {
        extracted: candidates.len(),
        classified: run.stats,
        cancelled: run.cancelled,
        subscriptions: SubscriptionSet::from_results(&run.results),
    })
}

/// Files plus fetched channel pages; stdin when neither is given.
async fn gather_documents(
    config: &Config,
    files: &[PathBuf],
    channels: &[String],
) -> Result<Vec<String>> {
    if files.is_empty() && channels.is_empty() {
        return read_documents(files);
    }

    let mut documents = if files.is_empty() {
        Vec::new()
    } else {
        read_documents(files)?
    };
    documents.extend(fetch_channel_pages(config, channels).await?);
    Ok(documents)
}

/// Fetches the public preview page of every channel. Unreachable channels
/// are logged and skipped.
async fn fetch_channel_pages(config: &Config, channels: &[String]) -> Result<Vec<String>> {
    if channels.is_empty() {
        return Ok(Vec::new());
    }

    let fetcher = BoundedFetcher::new(
        Arc::new(HttpFetcher::new(config)?),
        config.classify_concurrency(),
        config.retry_policy(),
        config.classify_timeout(),
    )
    .with_user_agent(config.user_agent());

    let mut pages = Vec::new();
    for channel in channels {
        let Some(url) = links::channel_preview_url(channel) else {
            warn!(channel = %channel, "not a channel name");
            continue;
        };
        match fetcher.fetch(&url).await {
            FetchOutcome::Success(response) => pages.push(response.body),
            FetchOutcome::Failure(failure) => {
                warn!(url = %url, %failure, "channel page unavailable");
            }
        }
    }
    info!(channels = channels.len(), fetched = pages.len(), "channel pages fetched");
    Ok(pages)
}

fn read_documents(files: &[PathBuf]) -> Result<Vec<String>> {
    if files.is_empty() {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        return Ok(vec![buffer]);
    }

    files.iter().map(|path| read_file(path)).collect()
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
