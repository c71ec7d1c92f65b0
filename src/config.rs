use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

/// Runtime configuration for the risk engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding per-user baseline records.
    pub baseline_dir: String,
    /// Path to the trained model artifact; `None` runs rule-based only.
    pub model_path: Option<String>,
    /// HMAC secret for session tokens.
    pub token_secret: String,
    /// Session token lifetime in hours.
    pub token_ttl_hours: i64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            baseline_dir: "./baselines".to_string(),
            model_path: Some("./risk_model.json".to_string()),
            token_secret: "change-me".to_string(),
            token_ttl_hours: 8,
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration: defaults, then an optional `CONFIG_FILE`
/// key=value file, then environment variable overrides.
pub fn load_config() -> Result<Config> {
    // Pick up a local .env if present
    dotenv::dotenv().ok();

    let mut config = Config::default();

    if let Ok(path) = env::var("CONFIG_FILE") {
        load_from_file(&mut config, Path::new(&path))?;
    }

    load_from_env(&mut config);

    Ok(config)
}

fn apply(config: &mut Config, key: &str, value: &str) {
    match key {
        "BASELINE_DIR" => config.baseline_dir = value.to_string(),
        "MODEL_PATH" => {
            config.model_path = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
        "TOKEN_SECRET" => config.token_secret = value.to_string(),
        "TOKEN_TTL_HOURS" => {
            if let Ok(hours) = value.parse() {
                config.token_ttl_hours = hours;
            }
        }
        "LOG_LEVEL" => config.log_level = value.to_string(),
        _ => {}
    }
}

fn load_from_env(config: &mut Config) {
    for key in [
        "BASELINE_DIR",
        "MODEL_PATH",
        "TOKEN_SECRET",
        "TOKEN_TTL_HOURS",
        "LOG_LEVEL",
    ] {
        if let Ok(value) = env::var(key) {
            apply(config, key, &value);
        }
    }
}

/// Load configuration from a key=value file.
fn load_from_file(config: &mut Config, path: &Path) -> Result<()> {
    let file = File::open(path).context("Failed to open configuration file")?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line.context("Failed to read line from configuration file")?;
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(index) = line.find('=') {
            let key = line[..index].trim();
            let value = line[index + 1..].trim();
            apply(config, key, value);
        }
    }

    Ok(())
}
