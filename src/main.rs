use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use risk_engine::baseline::{BaselineManager, FileBaselineStore};
use risk_engine::classifier::{LoadedModel, Scorer};
use risk_engine::config;
use risk_engine::engine::{RiskAssessmentService, RiskDecisionEngine, SessionTokenIssuer};
use risk_engine::models::LoginAttempt;
use risk_engine::utils;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assess a login attempt from a JSON file
    Assess {
        /// Path to the attempt JSON document
        attempt: PathBuf,
    },

    /// Resolve a step-up challenge for an attempt
    StepUp {
        attempt: PathBuf,
        /// Whether the security answer was correct
        #[arg(long)]
        correct: bool,
    },

    /// Enroll a user's first (or another verified) session
    Enroll {
        attempt: PathBuf,
    },

    /// Show a user's baseline status
    Baseline {
        user_id: String,
    },

    /// Delete a user's baseline (account deletion/reset)
    Reset {
        user_id: String,
    },

    /// Report engine health and model status
    Health,
}

fn read_attempt(path: &PathBuf) -> Result<LoginAttempt> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read attempt file {}", path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse attempt JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::load_config()?;

    // Initialize logging
    utils::logging::init_logger(&config.log_level);

    let cli = Cli::parse();

    // Wire up the service: store, optional model, engine, tokens
    let store = Arc::new(
        FileBaselineStore::new(&config.baseline_dir)
            .context("Failed to open baseline directory")?,
    );
    let baselines = Arc::new(BaselineManager::new(store));

    let scorer: Option<Arc<dyn Scorer>> = match &config.model_path {
        Some(path) => match LoadedModel::from_path(path) {
            Ok(model) => Some(Arc::new(model)),
            Err(err) => {
                warn!("model not loaded ({}); using rule-based fallback", err);
                None
            }
        },
        None => None,
    };

    let engine = Arc::new(RiskDecisionEngine::new(scorer));
    let service = RiskAssessmentService::new(
        engine.clone(),
        baselines,
        SessionTokenIssuer::new(&config.token_secret, config.token_ttl_hours),
    );

    match cli.command {
        Command::Assess { attempt } => {
            let attempt = read_attempt(&attempt)?;
            let response = service.assess(&attempt).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::StepUp { attempt, correct } => {
            let attempt = read_attempt(&attempt)?;
            let response = service.verify_step_up(&attempt, correct).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Enroll { attempt } => {
            let attempt = read_attempt(&attempt)?;
            let status = service.enroll(&attempt).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Baseline { user_id } => match service.baseline_status(&user_id).await? {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("no baseline for {}", user_id),
        },
        Command::Reset { user_id } => {
            if service.delete_baseline(&user_id).await? {
                info!("baseline deleted for {}", user_id);
                println!("deleted");
            } else {
                println!("no baseline for {}", user_id);
            }
        }
        Command::Health => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "healthy",
                    "model_loaded": engine.has_scorer(),
                    "timestamp": chrono::Utc::now(),
                })
            );
        }
    }

    Ok(())
}
