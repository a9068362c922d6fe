// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use updot::{
    config::{Settings, MANIFEST_FILE_NAME},
    doctor::diagnose,
    path::default_settings_file,
    selfupdate::self_update,
    sync::{relink, status, sync, SyncOptions},
};

use anyhow::{bail, Result};
use clap::{ArgGroup, Parser};
use std::{
    io::{stderr, stdin, IsTerminal},
    path::PathBuf,
    process::exit,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    long_about = "Synchronize dotfiles between a git repository and their home directory locations.",
    override_usage = "updot [options]",
    version
)]
#[command(group(ArgGroup::new("verbosity").args(["debug", "verbose", "silent"])))]
#[command(group(ArgGroup::new("mode").args(["status", "relink", "self_update", "doctor"])))]
struct Cli {
    /// Log everything, including libgit2 and subprocess detail.
    #[arg(short, long)]
    pub debug: bool,

    /// Log extra detail.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log nothing.
    #[arg(short, long)]
    pub silent: bool,

    /// Custom commit message.
    #[arg(short, long, value_name = "msg")]
    pub message: Option<String>,

    /// Show link status and uncommitted changes without changing anything.
    #[arg(short = 'n', long)]
    pub status: bool,

    /// Only reconcile links, without touching git or the network.
    #[arg(short = 'l', long)]
    pub relink: bool,

    /// Reinstall updot from its git source.
    #[arg(short = 'u', long)]
    pub self_update: bool,

    /// Diagnose problems with environment and dotfiles.
    #[arg(long)]
    pub doctor: bool,

    /// Use alternate settings file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Dotfiles repository directory.
    #[arg(long, value_name = "path")]
    pub repo_dir: Option<PathBuf>,

    /// Directory tracked paths are linked into.
    #[arg(long, value_name = "path")]
    pub target_dir: Option<PathBuf>,

    /// Directory displaced files are backed up into.
    #[arg(long, value_name = "path")]
    pub backup_dir: Option<PathBuf>,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.silent {
            "off"
        } else if self.debug {
            "trace"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    fn settings(&self) -> Result<Settings> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => default_settings_file()?,
        };
        let mut settings = Settings::load(path)?;

        if let Some(repo_dir) = &self.repo_dir {
            settings.layout.manifest = repo_dir.join(MANIFEST_FILE_NAME);
            settings.layout.repo_root = repo_dir.clone();
        }
        if let Some(target_dir) = &self.target_dir {
            settings.layout.target_root = target_dir.clone();
        }
        if let Some(backup_dir) = &self.backup_dir {
            settings.layout.backup_root = backup_dir.clone();
        }
        settings.layout = settings.layout.absolute()?;

        Ok(settings)
    }

    async fn run(self) -> Result<()> {
        let settings = self.settings()?;
        if self.self_update {
            self_update(&settings.update_source)?;
        } else if self.doctor {
            run_doctor(&settings).await?;
        } else if self.status {
            run_status(&settings)?;
        } else if self.relink {
            relink(&settings, stdin().is_terminal())?;
        } else {
            let opts = SyncOptions {
                message: self.message,
                interactive: stdin().is_terminal(),
                progress: !self.silent && stderr().is_terminal(),
            };
            sync(&settings, &opts).await?;
            info!("dotfiles synchronized");
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run_doctor(settings: &Settings) -> Result<()> {
    let diagnosis = diagnose(settings).await;
    print!("{diagnosis}");
    if !diagnosis.is_healthy() {
        bail!("diagnosis found problems");
    }

    Ok(())
}

fn run_status(settings: &Settings) -> Result<()> {
    let report = status(settings)?;
    println!("Links:");
    print!("{}", report.links);

    if let Some(changes) = report.changes {
        println!("\nRepository:");
        println!("{changes}");
    }

    Ok(())
}
