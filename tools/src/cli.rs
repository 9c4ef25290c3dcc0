//! Command-line interface for `iam-admin`.

use clap::{Parser, Subcommand};

/// Operator tooling for the event-sourced IAM engine.
///
/// Configuration is read from the environment (`EVENTS_DATABASE_*`,
/// `PROJECTIONS_DATABASE_*`, `IAM_PROJECTION_*`); logs go to stderr, filtered
/// by `RUST_LOG`.
#[derive(Parser, Debug)]
#[command(name = "iam-admin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Admin commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create or upgrade the event log and projection tables
    Migrate,

    /// Print the events of an instance as JSON lines
    Export {
        /// Instance to export
        #[arg(value_parser = non_blank)]
        instance_id: String,
    },

    /// Run the projections until Ctrl-C
    Project,
}

fn non_blank(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("instance id must not be blank".to_string())
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("iam-admin").chain(args.iter().copied())).map(|cli| cli.command)
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse(&["migrate"]).unwrap(), Command::Migrate);
        assert_eq!(parse(&["project"]).unwrap(), Command::Project);
        assert_eq!(
            parse(&["export", "INSTANCE"]).unwrap(),
            Command::Export {
                instance_id: "INSTANCE".to_string()
            }
        );
    }

    #[test]
    fn rejects_bad_invocations() {
        assert_eq!(parse(&[]).unwrap_err().kind(), ErrorKind::MissingSubcommand);
        assert_eq!(parse(&["drop"]).unwrap_err().kind(), ErrorKind::InvalidSubcommand);
        assert_eq!(
            parse(&["export"]).unwrap_err().kind(),
            ErrorKind::MissingRequiredArgument
        );
        assert_eq!(parse(&["export", " "]).unwrap_err().kind(), ErrorKind::ValueValidation);
        assert_eq!(parse(&["migrate", "now"]).unwrap_err().kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn help_is_generated() {
        assert_eq!(parse(&["--help"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
    }
}
