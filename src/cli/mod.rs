pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging for the crawl node
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one crawl job and wait for it to finish
    Run {
        /// Job description (JSON)
        #[arg(required = true)]
        job: PathBuf,

        /// Configuration profile to use instead of the default one
        #[arg(short, long)]
        profile: Option<String>,

        /// Print records as JSON lines instead of posting them to the collector
        #[arg(long)]
        stdout: bool,
    },

    /// Check a job description without running it
    Validate {
        /// Job description (JSON)
        #[arg(required = true)]
        job: PathBuf,
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

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { job, profile, stdout } => {
            info!("Running job from {}", job.display());
            commands::run(job, profile, stdout).await
        }
        Commands::Validate { job } => {
            info!("Validating job from {}", job.display());
            commands::validate(job)
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from(["crawl-node", "run", "job.json", "--stdout", "-p", "staging", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { job, profile, stdout } => {
                assert_eq!(job, PathBuf::from("job.json"));
                assert_eq!(profile.as_deref(), Some("staging"));
                assert!(stdout);
            }
            _ => panic!("expected run"),
        }
    }
}
