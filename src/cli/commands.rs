use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::browser::WebDriverLauncher;
use crate::cli::config::NodeConfig;
use crate::crawler::controller::CrawlerController;
use crate::crawler::job::JobRequest;
use crate::delivery::{Collector, HttpCollector, StdoutCollector};

/// Read a job description from disk
fn read_job(path: &Path) -> Result<JobRequest> {
    let contents =
        fs::read_to_string(path).context(format!("Failed to read job file: {}", path.display()))?;
    serde_json::from_str(&contents).context(format!("Failed to parse job file: {}", path.display()))
}

fn load_config(profile: Option<&str>) -> Result<NodeConfig> {
    match profile {
        Some(profile) => {
            NodeConfig::load_profile(profile).context(format!("Failed to load profile: {}", profile))
        }
        None => NodeConfig::load_default(),
    }
}

/// Run one job through the worker pool and wait for its terminal record
pub async fn run(job: PathBuf, profile: Option<String>, stdout: bool) -> Result<()> {
    let request = read_job(&job)?;
    let config = load_config(profile.as_deref())?;

    let collector: Arc<dyn Collector> = if stdout {
        Arc::new(StdoutCollector::stdout())
    } else {
        Arc::new(HttpCollector::new(&config.collector).context("Failed to set up the collector")?)
    };
    let launcher = Arc::new(WebDriverLauncher::new(config.browser.clone()));
    let controller = CrawlerController::from_config(&config, launcher, collector);

    let handle = controller
        .submit(request)
        .map_err(|rejection| anyhow::anyhow!("Job rejected ({}): {}", rejection.status_code(), rejection))?;
    eprintln!("{}", serde_json::to_string(&handle.ack)?);

    let wait = handle.wait();
    tokio::pin!(wait);

    let metrics = tokio::select! {
        metrics = &mut wait => metrics,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling job");
            controller.shutdown();
            wait.await
        }
    }
    .context("Job worker failed")?;

    info!(
        "Job delivered {} records ({} ok, {} failed)",
        metrics.records, metrics.successes, metrics.failures
    );
    if metrics.delivery_failures > 0 {
        warn!("{} records could not be delivered", metrics.delivery_failures);
    }

    Ok(())
}

/// Validate a job description without acquiring a browser
pub fn validate(job: PathBuf) -> Result<()> {
    let request = read_job(&job)?;
    let config = NodeConfig::default();
    let strategy = crate::crawler::strategy::resolve(request.strategy.as_deref())
        .map_err(|rejection| anyhow::anyhow!("Job rejected: {}", rejection))?;
    let job = request
        .into_job(strategy, &config.browser.default_user_agent)
        .map_err(|rejection| anyhow::anyhow!("Job rejected: {}", rejection))?;

    println!("Job is valid");
    println!("Type: {}", job.strategy);
    println!("URLs: {}", job.urls.len());
    println!("Crawl delay: {}s", job.options.crawl_delay().as_secs());
    if let Some(limit) = job.options.limit {
        println!("Limit: {}", limit);
    }
    if let Some(login) = &job.login {
        println!("Login: {}", login.login_url);
    }

    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = NodeConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it from defaults when missing
pub fn manage_profile(profile_name: String) -> Result<()> {
    match NodeConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = NodeConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = NodeConfig::load_default()?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}
