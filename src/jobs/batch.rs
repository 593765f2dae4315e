use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::jobs::dispatcher::Dispatcher;
use crate::scraper::pipeline::{ScrapeOptions, ScrapePipeline};
use crate::scraper::ContactRecord;
use crate::storage::blob::BlobStore;
use crate::storage::jobs::{JobPatch, JobRecord, JobStatus, JobStore};
use crate::storage::StorageError;

/// Job-level fatal errors. Any of these aborts the whole batch and marks
/// the job failed; row-level problems never surface here.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Column '{column}' not found in CSV. Available columns: {available}")]
    MissingColumn { column: String, available: String },

    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("input file unavailable: {0}")]
    InputUnavailable(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Which pipeline variant a batch runs per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Full contact pipeline: emails, phones and LinkedIn URLs.
    #[default]
    Full,
    /// Homepage-only LinkedIn discovery, no AI calls.
    LinkedinOnly,
}

/// Shared collaborators handed to every batch job.
#[derive(Clone)]
pub struct BatchContext {
    pub pipeline: Arc<ScrapePipeline>,
    pub jobs: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
    /// Inner pool width: row pipelines running in parallel within one job.
    pub csv_workers: usize,
    /// Adds an `error` column to the output when set.
    pub debug: bool,
    pub mode: BatchMode,
    pub options: ScrapeOptions,
}

/// Result columns appended to every output row.
const RESULT_COLUMNS: [&str; 10] = [
    "scrape_status",
    "raw_json_response",
    "email1",
    "email2",
    "email3",
    "phone1",
    "phone2",
    "phone3",
    "company_linkedin_url",
    "personal_linkedin_url",
];

/// Output of one processed row.
struct RowResult {
    status: String,
    raw_json: String,
    emails: Vec<String>,
    phones: Vec<String>,
    company_linkedin: String,
    personal_linkedin: String,
    error: Option<String>,
}

impl RowResult {
    fn skipped() -> Self {
        Self {
            status: "skipped".to_string(),
            raw_json: String::new(),
            emails: Vec::new(),
            phones: Vec::new(),
            company_linkedin: String::new(),
            personal_linkedin: String::new(),
            error: Some("Empty website URL".to_string()),
        }
    }

    fn errored(website: &str, message: String) -> Self {
        let raw_json = serde_json::json!({
            "website": website,
            "error": message,
            "status": "error",
        })
        .to_string();
        Self {
            status: "error".to_string(),
            raw_json,
            emails: Vec::new(),
            phones: Vec::new(),
            company_linkedin: String::new(),
            personal_linkedin: String::new(),
            error: Some(message),
        }
    }

    fn from_record(record: &ContactRecord) -> Self {
        Self {
            status: record.status.to_string(),
            raw_json: serde_json::to_string(record).unwrap_or_default(),
            emails: record.emails.iter().take(3).cloned().collect(),
            phones: record.phones.iter().take(3).cloned().collect(),
            company_linkedin: record
                .linkedin_urls
                .company
                .iter()
                .next()
                .cloned()
                .unwrap_or_default(),
            personal_linkedin: record
                .linkedin_urls
                .personal
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            error: None,
        }
    }

    /// Values in `RESULT_COLUMNS` order, plus the error column in debug mode.
    fn fields(&self, debug: bool) -> Vec<String> {
        let pick = |values: &[String], i: usize| values.get(i).cloned().unwrap_or_default();
        let mut fields = vec![
            self.status.clone(),
            self.raw_json.clone(),
            pick(&self.emails, 0),
            pick(&self.emails, 1),
            pick(&self.emails, 2),
            pick(&self.phones, 0),
            pick(&self.phones, 1),
            pick(&self.phones, 2),
            self.company_linkedin.clone(),
            self.personal_linkedin.clone(),
        ];
        if debug {
            fields.push(self.error.clone().unwrap_or_default());
        }
        fields
    }
}

/// Create the job record, persist the input file and enqueue the batch on
/// the dispatcher. Returns the queued job record.
pub async fn start_batch(
    ctx: &BatchContext,
    dispatcher: &Dispatcher,
    csv_bytes: Vec<u8>,
    filename: &str,
    website_column: &str,
) -> Result<JobRecord, BatchError> {
    let total_rows = count_rows(&csv_bytes)?;
    info!("CSV '{}' contains {} row(s)", filename, total_rows);

    let job = ctx.jobs.create(total_rows, None, filename).await?;

    let input_ref = match ctx.blobs.upload(&job.id, &csv_bytes, filename, false).await {
        Ok(input_ref) => input_ref,
        Err(e) => {
            let message = format!("Failed to store input CSV: {}", e);
            ctx.jobs
                .finish(&job.id, JobStatus::Failed, Some(&message), None)
                .await?;
            return Err(e.into());
        }
    };

    ctx.jobs
        .update(
            &job.id,
            JobPatch {
                status: None,
                input_ref: Some(input_ref.clone()),
            },
        )
        .await?;

    let job_ctx = ctx.clone();
    let job_id = job.id.clone();
    let column = website_column.to_string();
    info!("Submitting job {} to the worker pool", job_id);
    dispatcher.submit(async move {
        run_batch(job_ctx, job_id, input_ref, column).await;
    });

    Ok(job)
}

/// Batch job body. Fatal errors are converted into a terminal `failed`
/// status here so nothing escapes into the dispatcher.
pub async fn run_batch(ctx: BatchContext, job_id: String, input_ref: String, website_column: String) {
    if let Err(e) = process_batch(&ctx, &job_id, &input_ref, &website_column).await {
        error!("Job {} failed: {}", job_id, e);
        match ctx
            .jobs
            .finish(&job_id, JobStatus::Failed, Some(&e.to_string()), None)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Job {} was already terminal", job_id),
            Err(store_err) => error!("Could not record failure of job {}: {}", job_id, store_err),
        }
    }
}

async fn process_batch(
    ctx: &BatchContext,
    job_id: &str,
    input_ref: &str,
    website_column: &str,
) -> Result<(), BatchError> {
    info!("Job {} starting", job_id);
    ctx.jobs
        .update(
            job_id,
            JobPatch {
                status: Some(JobStatus::Processing),
                input_ref: None,
            },
        )
        .await?;

    let bytes = ctx
        .blobs
        .download(input_ref)
        .await?
        .ok_or_else(|| BatchError::InputUnavailable(input_ref.to_string()))?;

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;

    let column_index =
        headers
            .iter()
            .position(|h| h == website_column)
            .ok_or_else(|| BatchError::MissingColumn {
                column: website_column.to_string(),
                available: headers.join(", "),
            })?;

    info!(
        "Job {}: {} row(s), inner pool width {}",
        job_id,
        rows.len(),
        ctx.csv_workers
    );

    // Fan every row out at once; the semaphore bounds how many actually run.
    let slots = Arc::new(Semaphore::new(ctx.csv_workers.max(1)));
    let mut handles = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let website = row.get(column_index).unwrap_or_default().trim().to_string();
        let ctx = ctx.clone();
        let job_id = job_id.to_string();
        let slots = slots.clone();
        handles.push(tokio::spawn(async move {
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    // Only possible if the semaphore is closed; never run the
                    // row outside the pool bound.
                    error!("Job {} row {}: row pool closed: {}", job_id, index + 1, e);
                    record_progress(&ctx, &job_id, true).await;
                    return RowResult::errored(&website, "row pool closed".to_string());
                }
            };
            process_row(&ctx, &job_id, index, &website).await
        }));
    }

    // Collect in spawn order so output rows line up with input rows by
    // index, regardless of completion order.
    let outcomes = futures::future::join_all(handles).await;
    let mut results = Vec::with_capacity(outcomes.len());
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                // A panicking row never reached its progress increment.
                error!("Job {} row {} crashed: {}", job_id, index + 1, e);
                record_progress(ctx, job_id, true).await;
                results.push(RowResult::errored("", format!("row crashed: {}", e)));
            }
        }
    }

    let output = write_output(&headers, &rows, &results, ctx.debug)?;

    info!("Job {}: all rows processed, storing output CSV", job_id);
    let job = ctx
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| StorageError::JobNotFound(job_id.to_string()))?;
    let output_ref = ctx
        .blobs
        .upload(job_id, &output, &job.filename, true)
        .await?;

    let transitioned = ctx
        .jobs
        .finish(job_id, JobStatus::Completed, None, Some(&output_ref))
        .await?;
    if transitioned {
        info!("Job {} completed ({})", job_id, output_ref);
    } else {
        warn!("Job {} was already terminal before completion", job_id);
    }
    Ok(())
}

/// Process one row: skip blanks, otherwise run the pipeline, then bump the
/// job's progress counters exactly once.
async fn process_row(ctx: &BatchContext, job_id: &str, index: usize, website: &str) -> RowResult {
    if website.is_empty() {
        debug!("Job {} row {}: empty website, skipping", job_id, index + 1);
        record_progress(ctx, job_id, true).await;
        return RowResult::skipped();
    }

    debug!("Job {} row {}: scraping {}", job_id, index + 1, website);
    let scraped = match ctx.mode {
        BatchMode::Full => ctx.pipeline.scrape(website, &ctx.options).await,
        BatchMode::LinkedinOnly => ctx.pipeline.scrape_linkedin_only(website).await,
    };
    let (result, failed) = match scraped {
        Ok(record) => (RowResult::from_record(&record), false),
        Err(e) => {
            warn!("Job {} row {} error: {}", job_id, index + 1, e);
            (RowResult::errored(website, e.to_string()), true)
        }
    };

    record_progress(ctx, job_id, failed).await;
    result
}

async fn record_progress(ctx: &BatchContext, job_id: &str, failed: bool) {
    if let Err(e) = ctx.jobs.increment_progress(job_id, failed).await {
        error!("Could not record progress for job {}: {}", job_id, e);
    }
}

fn count_rows(csv_bytes: &[u8]) -> Result<u64, BatchError> {
    let mut reader = csv::Reader::from_reader(csv_bytes);
    // Surface malformed input as a fatal error instead of a zero count.
    let mut total = 0u64;
    for record in reader.records() {
        record?;
        total += 1;
    }
    Ok(total)
}

fn write_output(
    headers: &[String],
    rows: &[csv::StringRecord],
    results: &[RowResult],
    debug: bool,
) -> Result<Vec<u8>, BatchError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header_row: Vec<String> = headers.to_vec();
    header_row.extend(RESULT_COLUMNS.iter().map(|c| c.to_string()));
    if debug {
        header_row.push("error".to_string());
    }
    writer.write_record(&header_row)?;

    for (row, result) in rows.iter().zip(results) {
        let mut record: Vec<String> = row.iter().map(str::to_string).collect();
        // Pad short rows so the result columns stay aligned.
        record.resize(headers.len(), String::new());
        record.extend(result.fields(debug));
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| BatchError::InputUnavailable(format!("could not assemble output: {}", e)))
}
