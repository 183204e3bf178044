// src/main.rs
//! Aurora Package Manager - CLI Entry Point

use anyhow::{bail, Result};
use aurora::{PackageManager, Transaction};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "aurora")]
#[command(version)]
#[command(about = "A transactional source-based package manager", long_about = None)]
struct Cli {
    /// Alternate target root (for chroot / bootstrap workflows)
    #[arg(long, default_value = "/", global = true)]
    bootstrap: PathBuf,

    /// Downgrade pre-flight refusals (file/package conflicts, dependency
    /// violations) to warnings
    #[arg(long, global = true)]
    force: bool,

    /// Disable checksum and signature verification
    #[arg(long, global = true)]
    skip_crypto: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize repository indexes
    Sync,

    /// Install packages and their dependencies
    Install {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Install already-present package archives
    InstallLocal {
        /// Archive files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove installed packages
    Remove {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Sync repositories and upgrade every outdated package
    Update,
}

// =============================================================================
// Helpers
// =============================================================================

fn require_root() -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        bail!("aurora must be run as root for this operation");
    }
    Ok(())
}

fn print_plan(plan: &Transaction) {
    if !plan.to_remove.is_empty() {
        println!("The following packages will be REMOVED:");
        for pkg in &plan.to_remove {
            println!("  {} {}", pkg.pkg.name, pkg.pkg.version);
        }
    }
    if !plan.to_install.is_empty() {
        println!("The following packages will be installed:");
        for item in &plan.to_install {
            println!("  {} {}", item.metadata.name, item.metadata.version);
        }
    }
}

/// Ask for confirmation; declining is a clean exit, not a failure
fn confirm() -> Result<bool> {
    print!("Proceed? [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn run(cli: Cli) -> Result<()> {
    require_root()?;

    let mut manager = PackageManager::new(&cli.bootstrap, cli.skip_crypto)?;

    match cli.command {
        Commands::Sync => {
            manager.sync()?;
        }

        Commands::Install { names } => {
            let plan = manager.plan_install(&names, cli.force)?;
            if plan.is_empty() {
                println!("Nothing to do. All packages are already installed.");
                return Ok(());
            }
            print_plan(&plan);
            if !confirm()? {
                println!("Aborted by user.");
                return Ok(());
            }
            manager.commit_install(&plan)?;
        }

        Commands::InstallLocal { files } => {
            for file in &files {
                // The executor resolves the archive from arbitrary working
                // directories, so hand it an absolute path.
                let absolute = std::fs::canonicalize(file)
                    .map_err(|e| anyhow::anyhow!("file not found: {}: {e}", file.display()))?;
                manager.install_local(&absolute, cli.force)?;
            }
        }

        Commands::Remove { names } => {
            let plan = manager.plan_remove(&names, cli.force)?;
            if plan.is_empty() {
                println!("Nothing to do.");
                return Ok(());
            }
            print_plan(&plan);
            if !confirm()? {
                println!("Aborted by user.");
                return Ok(());
            }
            manager.execute_transaction(&plan)?;
        }

        Commands::Update => {
            let plan = manager.plan_update()?;
            if plan.is_empty() {
                println!("System is already up to date.");
                return Ok(());
            }
            print_plan(&plan);
            if !confirm()? {
                println!("Aborted by user.");
                return Ok(());
            }
            manager.prepare_transaction_assets(&plan)?;
            manager.execute_transaction(&plan)?;
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
