//! Command-line surface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailroom_settings::{MailroomSettings, load_settings_from_path, settings_path};

/// Mailroom store service.
#[derive(Parser, Debug)]
#[command(name = "mailroom", about = "Mailroom store service", version)]
pub struct Cli {
    /// Settings file (defaults to `~/.mailroom/settings.json`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Log filter such as `info` or `mailroom_store=debug` (overrides settings).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// What to run; `serve` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the writer and session upkeep until interrupted.
    Serve,
    /// Delete expired sessions once and exit.
    Sweep,
}

impl Cli {
    /// The subcommand to run.
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }

    /// Load settings from the chosen file, then apply command-line overrides.
    pub fn resolve_settings(&self) -> Result<MailroomSettings> {
        let path = self.config.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(db_path) = &self.db_path {
            settings.database.path.clone_from(db_path);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::parse_from(["mailroom"]);
        assert_eq!(cli.command(), Command::Serve);
    }

    #[test]
    fn parses_sweep_with_global_flags() {
        let cli = Cli::parse_from(["mailroom", "sweep", "--db-path", "/tmp/x.db"]);
        assert_eq!(cli.command(), Command::Sweep);
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("settings.json");
        std::fs::write(
            &config,
            r#"{"database": {"path": "/from/file.db"}, "logging": {"level": "warn"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "mailroom".into(),
            "--config".into(),
            config.display().to_string(),
            "--log-level".into(),
            "debug".into(),
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.logging.level, "debug");

        let cli = Cli::parse_from([
            "mailroom".into(),
            "--config".into(),
            config.display().to_string(),
            "--db-path".into(),
            "/from/flag.db".to_string(),
        ]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.database.path, PathBuf::from("/from/flag.db"));
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("settings.json");
        std::fs::write(&config, "{ not json").unwrap();

        let cli = Cli::parse_from(["mailroom".into(), "--config".into(), config.display().to_string()]);
        let err = cli.resolve_settings().unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
