//! rbac-sync command-line entry point.
//!
//! # Purpose
//! Loads configuration, opens the configured store, and runs one of the
//! `import`, `export` or `run` commands. Exit code 0 means success, 1 means
//! the command failed or was refused.
use clap::{Parser, Subcommand};
use rbac_sync::config::SyncConfig;
use rbac_sync::{commands, observability, store};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "rbac-sync", version)]
#[command(about = "Sync RBAC roles and permissions with YAML documents")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Import roles and every permission document into the store
    Import,
    /// Export the store to roles and permission documents
    Export {
        /// Include collections with the reserved system prefix
        #[arg(long)]
        system: bool,
    },
    /// Run continuously: import on start and export on change, per RBAC_SYNC_MODE
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match execute(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "rbac-sync failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command) -> anyhow::Result<()> {
    let metrics_handle = observability::init_observability("rbac-sync")?;
    let config = SyncConfig::from_env_or_yaml()?;
    let store = store::build_store(&config).await?;

    match command {
        Command::Import => {
            let summary = commands::import(&config, store.as_ref()).await?;
            println!(
                "imported {} roles and {} collections",
                summary.roles,
                summary.collections.len()
            );
        }
        Command::Export { system } => {
            let summary = commands::export(&config, store.as_ref(), system).await?;
            println!(
                "exported {} collections ({} documents removed)",
                summary.written.len(),
                summary.removed.len()
            );
        }
        Command::Run => {
            commands::run(&config, store, metrics_handle, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let args = Args::try_parse_from(["rbac-sync", "export", "--system"]).expect("args");
        assert_eq!(args.command, Command::Export { system: true });
        let args = Args::try_parse_from(["rbac-sync", "export"]).expect("args");
        assert_eq!(args.command, Command::Export { system: false });
        let args = Args::try_parse_from(["rbac-sync", "import"]).expect("args");
        assert_eq!(args.command, Command::Import);
        assert!(Args::try_parse_from(["rbac-sync"]).is_err());
        assert!(Args::try_parse_from(["rbac-sync", "import", "--system"]).is_err());
    }
}
