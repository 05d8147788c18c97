use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Parser, Debug)]
#[command(
    name = "reorg",
    version,
    about = "Snapshot, dedupe, migrate and validate a drifted plan catalog"
)]
struct Cli {
    /// Print the report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Paths, config, marker state and env overrides
    Status,
    /// Pre-flight analysis of the drift collection
    Analyze,
    /// Archive collections; with no --collection, every target plus a manifest
    Backup {
        #[arg(long = "collection", action = ArgAction::Append)]
        collections: Vec<String>,
    },
    /// List archives, newest first
    ListBackups {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Check archive integrity
    Verify {
        archive: Option<PathBuf>,
        #[arg(long, conflicts_with = "archive")]
        all: bool,
    },
    /// Delete all but the newest archives
    Cleanup {
        #[arg(long)]
        keep: Option<usize>,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Restore one archive
    Restore {
        archive: PathBuf,
        /// Target collection; defaults to the archived one
        #[arg(long)]
        collection: Option<String>,
        /// replace, append or upsert
        #[arg(long, default_value = "replace")]
        mode: String,
    },
    /// Remove duplicate plans, keeping the oldest
    Dedupe {
        #[arg(long)]
        dry_run: bool,
    },
    /// Rewrite plans to canonical field names and types
    Migrate {
        #[arg(long)]
        dry_run: bool,
        /// Rename fields only; keep values and legacy aliases
        #[arg(long)]
        preserve_data_only: bool,
    },
    /// Validate a collection against the schema
    Validate {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Backup, dedupe, migrate, validate and mark complete
    Reorganize {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Restore every collection named in a backup manifest
    EmergencyRestore { manifest: PathBuf },
}

fn dispatch(command: Command) -> Result<CommandReport> {
    match command {
        Command::Status => commands::status::run(),
        Command::Analyze => commands::analyze::run(),
        Command::Backup { collections } => {
            commands::backup::run(&commands::backup::BackupOptions { collections })
        }
        Command::ListBackups { collection } => {
            commands::list_backups::run(&commands::list_backups::ListBackupsOptions { collection })
        }
        Command::Verify { archive, all } => {
            commands::verify::run(&commands::verify::VerifyOptions { archive, all })
        }
        Command::Cleanup { keep, collection } => {
            commands::cleanup::run(&commands::cleanup::CleanupOptions { keep, collection })
        }
        Command::Restore {
            archive,
            collection,
            mode,
        } => commands::restore::run(&commands::restore::RestoreOptions {
            archive,
            collection,
            mode,
        }),
        Command::Dedupe { dry_run } => {
            commands::dedupe::run(&commands::dedupe::DedupeOptions { dry_run })
        }
        Command::Migrate {
            dry_run,
            preserve_data_only,
        } => commands::migrate::run(&commands::migrate::MigrateOptions {
            dry_run,
            preserve_data_only,
        }),
        Command::Validate { collection } => {
            commands::validate::run(&commands::validate::ValidateOptions { collection })
        }
        Command::Reorganize { force, dry_run } => {
            commands::reorganize::run(&commands::reorganize::ReorganizeOptions { force, dry_run })
        }
        Command::EmergencyRestore { manifest } => commands::emergency_restore::run(
            &commands::emergency_restore::EmergencyRestoreOptions { manifest },
        ),
    }
}

fn render_text(report: &CommandReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for line in &report.details {
        out.push_str(&format!("  {line}\n"));
    }
    for line in &report.issues {
        out.push_str(&format!("  ! {line}\n"));
    }
    out
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = dispatch(cli.command)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }

    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn backup_collects_repeated_collections() {
        let cli = Cli::parse_from(["reorg", "backup", "--collection", "plans", "--collection", "pages"]);
        match cli.command {
            Command::Backup { collections } => assert_eq!(collections, vec!["plans", "pages"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn json_flag_is_global() {
        let cli = Cli::parse_from(["reorg", "reorganize", "--dry-run", "--json"]);
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Command::Reorganize {
                force: false,
                dry_run: true
            }
        ));
    }

    #[test]
    fn text_render_marks_issues() {
        let mut report = CommandReport::new("verify");
        report.detail("a.json.gz: ok (3 documents)");
        report.issue("b.json.gz: corrupt archive");
        let text = render_text(&report);
        assert!(text.starts_with("verify: failed\n"));
        assert!(text.contains("  ! b.json.gz: corrupt archive\n"));
    }
}
