pub mod commands;
pub mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use config::AppConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration profile to use
    #[arg(short, long)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one website for emails, phones and LinkedIn URLs
    Scrape {
        /// Website URL to scrape
        #[arg(required = true)]
        url: String,

        /// Skip AI contact page detection for faster results
        #[arg(long)]
        skip_contact_page: bool,

        /// Also run AI validation over discovered LinkedIn URLs
        #[arg(long)]
        validate_linkedin: bool,
    },

    /// Fast LinkedIn-only scrape of one website
    Linkedin {
        /// Website URL to scrape
        #[arg(required = true)]
        url: String,
    },

    /// Scrape every website in a CSV file as a batch job
    Batch {
        /// Path to the input CSV file
        #[arg(required = true)]
        file: PathBuf,

        /// Name of the column holding website URLs
        #[arg(short, long, default_value = "website")]
        column: String,

        /// LinkedIn-only mode: homepage LinkedIn discovery, no AI calls
        #[arg(long)]
        linkedin: bool,
    },

    /// Check the status of a batch job
    Status {
        /// Job ID to check status for
        #[arg(required = true)]
        job_id: String,
    },

    /// List recent batch jobs
    Jobs {
        /// Only show jobs with this status (queued, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Drop the cached results of a website
    Forget {
        /// Website URL to forget
        #[arg(required = true)]
        url: String,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

fn load_config(profile: &Option<String>) -> Result<AppConfig> {
    match profile {
        Some(name) => AppConfig::load_profile(name)
            .context(format!("Failed to load profile: {}", name)),
        None => AppConfig::load_default(),
    }
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scrape {
            url,
            skip_contact_page,
            validate_linkedin,
        } => {
            info!("Scraping {}", url);
            let config = load_config(&cli.profile)?;
            commands::scrape(config, url, skip_contact_page, validate_linkedin).await
        }
        Commands::Linkedin { url } => {
            info!("LinkedIn-only scrape of {}", url);
            let config = load_config(&cli.profile)?;
            commands::linkedin(config, url).await
        }
        Commands::Batch {
            file,
            column,
            linkedin,
        } => {
            info!("Starting batch from {}", file.display());
            let config = load_config(&cli.profile)?;
            commands::batch(config, file, column, linkedin).await
        }
        Commands::Status { job_id } => {
            info!("Checking status for job {}", job_id);
            let config = load_config(&cli.profile)?;
            commands::status(config, job_id).await
        }
        Commands::Jobs { status, limit } => {
            let config = load_config(&cli.profile)?;
            commands::list_jobs(config, status, limit).await
        }
        Commands::Forget { url } => {
            info!("Forgetting cached results for {}", url);
            let config = load_config(&cli.profile)?;
            commands::forget(config, url).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name).await
            } else {
                info!("Showing current configuration");
                commands::show_config().await
            }
        }
    }
}
