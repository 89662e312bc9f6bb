//! CLI interface for Quire
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for inspecting and exercising
//! installed plugins.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Quire plugin host
///
/// Discovers plugin bundles, checks their trust evidence, and loads them
/// into an isolated runtime.
#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan plugin locations and list what was found
    Scan,

    /// Show a plugin's descriptor, risk and state
    Inspect {
        /// Plugin id
        id: String,
    },

    /// Run trust validation without loading
    Verify {
        /// Plugin id
        id: String,
    },

    /// Load a plugin, optionally invoke it, then unload it
    Load {
        /// Plugin id
        id: String,

        /// Invocation to deliver while loaded, as JSON
        /// (e.g. '{"kind":"menu_action","action_id":"redact"}')
        #[arg(long, value_name = "JSON")]
        invoke: Option<String>,
    },

    /// Show or change a plugin's stored settings
    Settings {
        /// Plugin id
        id: String,

        /// Replace the stored settings with this JSON value
        #[arg(long, value_name = "JSON", conflicts_with = "clear")]
        set: Option<String>,

        /// Remove the stored settings
        #[arg(long)]
        clear: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_with_global_flags() {
        let cli = Cli::parse_from(["quire", "--json", "--log", "debug", "scan"]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Scan));
    }

    #[test]
    fn test_config_override() {
        let cli = Cli::parse_from(["quire", "verify", "com.example.redactor", "--config", "/tmp/q.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/q.toml")));
        if let Command::Verify { id } = cli.command {
            assert_eq!(id, "com.example.redactor");
        } else {
            panic!("Expected Verify command");
        }
    }

    #[test]
    fn test_load_with_invocation() {
        let cli = Cli::parse_from([
            "quire",
            "load",
            "redactor",
            "--invoke",
            r#"{"kind":"menu_action","action_id":"redact"}"#,
        ]);
        if let Command::Load { id, invoke } = cli.command {
            assert_eq!(id, "redactor");
            assert!(invoke.unwrap().contains("menu_action"));
        } else {
            panic!("Expected Load command");
        }
    }

    #[test]
    fn test_settings_set_conflicts_with_clear() {
        let result = Cli::try_parse_from(["quire", "settings", "p", "--set", "{}", "--clear"]);
        assert!(result.is_err());

        let cli = Cli::parse_from(["quire", "settings", "p", "--clear"]);
        assert!(matches!(
            cli.command,
            Command::Settings {
                clear: true,
                set: None,
                ..
            }
        ));
    }
}
