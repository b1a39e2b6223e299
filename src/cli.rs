//! Command-line interface for Marathon, built on clap.
//!
//! [`Cli`] carries the global flags (`--config`, `--verbose`) and one
//! [`Command`] per operator action.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::DEFAULT_CONFIG_PATH;

/// Marathon: autonomous multi-stage hiring orchestrator.
#[derive(Debug, Parser)]
#[command(name = "marathon", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level regardless of the configured level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a marathon for an application.
    Start {
        #[arg(long)]
        job: String,

        #[arg(long)]
        application: String,
    },

    /// Run the scheduler loop.
    Worker {
        /// Run a single batch and exit.
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// List active processes.
    Status,

    /// List processes escalated to a human.
    Review,

    /// Show the decisions and events of one process.
    History { id: Uuid },

    /// Return an escalated or blocked process to the scheduler.
    Resume {
        id: Uuid,

        /// Note stored with the resume event.
        #[arg(long, default_value = "")]
        note: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_start_subcommand() {
        let cli = Cli::parse_from(["marathon", "start", "--job", "job-7", "--application", "app-3"]);
        match cli.command {
            Command::Start { job, application } => {
                assert_eq!(job, "job-7");
                assert_eq!(application, "app-3");
            }
            _ => panic!("expected Start command"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["marathon", "--config", "/etc/marathon.toml", "--verbose", "worker", "--once"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/etc/marathon.toml"));
        assert!(matches!(cli.command, Command::Worker { once: true }));
    }

    #[test]
    fn cli_parses_resume_with_note() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from(["marathon", "resume", &id.to_string(), "--note", "checked refs"]);
        match cli.command {
            Command::Resume { id: parsed, note } => {
                assert_eq!(parsed, id);
                assert_eq!(note, "checked refs");
            }
            _ => panic!("expected Resume command"),
        }
    }

    #[test]
    fn cli_rejects_bad_uuid() {
        assert!(Cli::try_parse_from(["marathon", "history", "not-a-uuid"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
