//! CLI argument parsing for the rastro diagnostic tool

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for trie dumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented tree (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rastro")]
#[command(version)]
#[command(about = "Inspect context backends and instrumentation patterns", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Configuration file (TOML)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Pattern sources shared by the trie subcommands
#[derive(clap::Args, Debug, Default)]
pub struct PatternArgs {
    /// Pattern in `KEY[*][=TAG,...]` form (repeatable)
    #[arg(short = 'p', long = "pattern", value_name = "PATTERN")]
    pub patterns: Vec<String>,

    /// File with one pattern per line; `#` starts a comment
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the pattern trie and print it
    Trie {
        #[command(flatten)]
        patterns: PatternArgs,

        /// Output format (text or json)
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the most specific pattern covering NAME
    Match {
        /// Name to look up, e.g. `Orders.submit`
        name: String,

        #[command(flatten)]
        patterns: PatternArgs,

        /// Print every covering pattern, least specific first
        #[arg(long = "all")]
        all: bool,
    },

    /// Probe the configured storage backends for the transaction key
    ///
    /// The probe runs inside a fresh logical flow, as an instrumented call
    /// would, unless `--outside-flow` is given.
    Probe {
        /// Probe from a bare thread with no logical flow attached
        #[arg(long = "outside-flow")]
        outside_flow: bool,

        /// Probe from inside a simulated inbound request
        #[arg(long = "in-request")]
        in_request: bool,

        /// Probe from inside a simulated RPC operation
        #[arg(long = "in-operation")]
        in_operation: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_trie_patterns() {
        let cli = Cli::parse_from(["rastro", "trie", "-p", "a*", "--pattern", "ab"]);
        match cli.command {
            Command::Trie { patterns, format } => {
                assert_eq!(patterns.patterns, vec!["a*", "ab"]);
                assert!(patterns.file.is_none());
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("expected trie, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_trie_json_format() {
        let cli = Cli::parse_from(["rastro", "trie", "--format", "json", "-f", "p.txt"]);
        match cli.command {
            Command::Trie { patterns, format } => {
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(patterns.file, Some(PathBuf::from("p.txt")));
            }
            other => panic!("expected trie, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_match() {
        let cli = Cli::parse_from(["rastro", "match", "Orders.submit", "-p", "Orders.*", "--all"]);
        match cli.command {
            Command::Match { name, patterns, all } => {
                assert_eq!(name, "Orders.submit");
                assert_eq!(patterns.patterns, vec!["Orders.*"]);
                assert!(all);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli =
            Cli::parse_from(["rastro", "probe", "--in-request", "--debug", "--config", "r.toml"]);
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("r.toml")));
        match cli.command {
            Command::Probe {
                in_request,
                in_operation,
                ..
            } => {
                assert!(in_request);
                assert!(!in_operation);
            }
            other => panic!("expected probe, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["rastro"]).is_err());
    }
}
