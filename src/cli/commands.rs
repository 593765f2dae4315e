use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ai::OpenAiAssistant;
use crate::cli::config::AppConfig;
use crate::jobs::{start_batch, BatchContext, BatchMode, Dispatcher};
use crate::scraper::fetch::Fetcher;
use crate::scraper::normalize::normalize_url;
use crate::scraper::pipeline::{ScrapeOptions, ScrapePipeline};
use crate::storage::blob::{BlobStore, FsBlobStore};
use crate::storage::cache::{ContactCache, MemoryCache, RedisCache, CONTACT_NS, LINKEDIN_NS};
use crate::storage::jobs::{JobRecord, JobStatus, JobStore, MemoryJobStore, RedisJobStore};

/// Everything a command needs, wired from one configuration.
pub struct Stack {
    pub config: AppConfig,
    pub pipeline: Arc<ScrapePipeline>,
    pub cache: Arc<dyn ContactCache>,
    pub jobs: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Connect the storage and AI backends. A missing Redis degrades to
/// in-process stores so single-shot commands still work.
pub async fn build_stack(config: AppConfig) -> Result<Stack> {
    let cache: Arc<dyn ContactCache> = match RedisCache::new(&config.cache).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!("Redis unavailable ({}); using an in-memory cache", e);
            Arc::new(MemoryCache::new())
        }
    };

    let jobs: Arc<dyn JobStore> = match RedisJobStore::new(&config.cache).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                "Redis unavailable ({}); job records will not outlive this process",
                e
            );
            Arc::new(MemoryJobStore::new())
        }
    };

    let assistant = Arc::new(OpenAiAssistant::from_settings(&config.ai)?);
    let fetcher = Fetcher::new(&config.scraper)?;
    let pipeline = Arc::new(ScrapePipeline::new(
        fetcher,
        cache.clone(),
        assistant,
        config.cache.ttl_seconds,
    ));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.blob_root.clone()));

    Ok(Stack {
        config,
        pipeline,
        cache,
        jobs,
        blobs,
    })
}

/// Scrape one website and print the contact record as JSON
pub async fn scrape(
    config: AppConfig,
    url: String,
    skip_contact_page: bool,
    validate_linkedin: bool,
) -> Result<()> {
    let stack = build_stack(config).await?;
    let options = ScrapeOptions {
        skip_contact_page,
        validate_linkedin,
    };

    let record = stack.pipeline.scrape(&url, &options).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Fast LinkedIn-only scrape of one website
pub async fn linkedin(config: AppConfig, url: String) -> Result<()> {
    let stack = build_stack(config).await?;

    let record = stack.pipeline.scrape_linkedin_only(&url).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Run a CSV batch job and follow it to completion
pub async fn batch(config: AppConfig, file: PathBuf, column: String, linkedin: bool) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.csv")
        .to_string();
    let csv_bytes = tokio::fs::read(&file)
        .await
        .context(format!("Failed to read CSV file: {}", file.display()))?;

    let stack = build_stack(config).await?;
    let dispatcher = Dispatcher::new(stack.config.pool.max_workers);
    let ctx = BatchContext {
        pipeline: stack.pipeline.clone(),
        jobs: stack.jobs.clone(),
        blobs: stack.blobs.clone(),
        csv_workers: stack.config.pool.csv_workers,
        debug: stack.config.debug,
        mode: if linkedin {
            BatchMode::LinkedinOnly
        } else {
            BatchMode::Full
        },
        options: ScrapeOptions::default(),
    };

    let job = start_batch(&ctx, &dispatcher, csv_bytes, &filename, &column).await?;
    info!("Batch job started with ID: {}", job.id);

    let done = follow_job(&stack, &job.id).await?;
    dispatcher.shutdown().await;

    print_job(&done);
    if let Some(output_ref) = &done.output_ref {
        if let Some(url) = stack.blobs.signed_url(output_ref, 3600).await? {
            println!("Output: {}", url);
        }
    }
    if done.status == JobStatus::Failed {
        anyhow::bail!("Job {} failed", done.id);
    }
    Ok(())
}

/// Poll the job store until the job reaches a terminal status, printing
/// progress along the way.
async fn follow_job(stack: &Stack, job_id: &str) -> Result<JobRecord> {
    let mut last_processed = u64::MAX;
    loop {
        let job = stack
            .jobs
            .get(job_id)
            .await?
            .context(format!("Job '{}' disappeared from the store", job_id))?;

        if job.processed_rows != last_processed {
            last_processed = job.processed_rows;
            info!(
                "Job {}: {}/{} row(s) processed, {} failed",
                job.id, job.processed_rows, job.total_rows, job.failed_rows
            );
        }
        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Check the status of a batch job
pub async fn status(config: AppConfig, job_id: String) -> Result<()> {
    let stack = build_stack(config).await?;

    let job = stack
        .jobs
        .get(&job_id)
        .await?
        .context(format!("Job '{}' not found", job_id))?;

    print_job(&job);
    if let Some(output_ref) = &job.output_ref {
        if let Some(url) = stack.blobs.signed_url(output_ref, 3600).await? {
            println!("Output: {}", url);
        }
    }
    Ok(())
}

/// List recent batch jobs, optionally filtered by status
pub async fn list_jobs(config: AppConfig, status: Option<String>, limit: usize) -> Result<()> {
    let filter = match status.as_deref() {
        Some(raw) => Some(
            JobStatus::parse(raw)
                .context(format!("Unknown status '{}'", raw))?,
        ),
        None => None,
    };

    let stack = build_stack(config).await?;
    let jobs = stack.jobs.list(filter, limit).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {:10}  {:>5}/{:<5}  {}  {}",
            job.id,
            job.status,
            job.processed_rows,
            job.total_rows,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.filename
        );
    }
    Ok(())
}

/// Drop the cached contact record of a website from both namespaces
pub async fn forget(config: AppConfig, url: String) -> Result<()> {
    let website = normalize_url(&url)?;
    let stack = build_stack(config).await?;

    let contact = stack.cache.delete(CONTACT_NS, website.as_str()).await?;
    let linkedin = stack.cache.delete(LINKEDIN_NS, website.as_str()).await?;

    if contact || linkedin {
        println!("Dropped cached results for {}", website);
    } else {
        println!("Nothing cached for {}", website);
    }
    Ok(())
}

fn print_job(job: &JobRecord) {
    println!("Job ID: {}", job.id);
    println!("File: {}", job.filename);
    println!("Status: {}", job.status);
    println!("Rows: {}/{}", job.processed_rows, job.total_rows);
    println!("Failed Rows: {}", job.failed_rows);
    println!("Created: {}", job.created_at);
    if let Some(completed_at) = &job.completed_at {
        println!("Completed: {}", completed_at);
    }
    if let Some(error) = &job.error {
        println!("Error: {}", error);
    }
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = AppConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    match AppConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            // Profile doesn't exist, create a new one
            warn!(
                "Profile '{}' does not exist. Creating a default profile.",
                profile_name
            );
            let config = AppConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub async fn show_config() -> Result<()> {
    let config = AppConfig::load_default()?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}
