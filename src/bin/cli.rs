// Megumi Download - Episodic media sync
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use megumi_download::pipeline::store_for;
use megumi_download::subtitle::RuleSourceCache;
use megumi_download::transfer::{TransferProgress, TransferState};
use megumi_download::{
    Catalog, InstanceLock, MkvToolNix, Pipeline, ProcessedLedger, ReleaseGroups, RunContext, SyncConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "config.megumi";
const CATALOG_FILE: &str = "serieslist.megumi";
const GROUPS_FILE: &str = "groups.megumi";

#[derive(Parser)]
#[command(name = "megumi-cli")]
#[command(about = "Megumi Download - fetch, rename and fix up finished episodes", long_about = None)]
struct Cli {
    /// Directory holding config.megumi, serieslist.megumi and groups.megumi
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Log (and print the report) as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer, place and post-process every eligible remote entry
    Run,
    /// Show where each eligible entry would be placed, without transferring
    Plan,
}

struct Loaded {
    config: SyncConfig,
    catalog: Catalog,
    groups: ReleaseGroups,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("megumi_download=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(config_dir: &Path) -> Result<Loaded> {
    let config_path = config_dir.join(CONFIG_FILE);
    let config = SyncConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
        .resolve_relative_to(config_dir);

    let catalog_path = config_dir.join(CATALOG_FILE);
    let catalog = Catalog::load(&catalog_path).with_context(|| format!("loading {}", catalog_path.display()))?;

    let groups_path = config_dir.join(GROUPS_FILE);
    let groups = if groups_path.exists() {
        ReleaseGroups::load(&groups_path).with_context(|| format!("loading {}", groups_path.display()))?
    } else {
        warn!(path = %groups_path.display(), "no release group file, every entry is eligible");
        ReleaseGroups::default()
    };

    info!(series = catalog.len(), local_root = %config.local_root.display(), "configuration loaded");
    Ok(Loaded { config, catalog, groups })
}

fn build_pipeline(loaded: Loaded) -> Result<Pipeline> {
    let store = store_for(&loaded.config).context("connecting to remote store")?;
    let muxer = Arc::new(MkvToolNix::from_config(&loaded.config));
    Ok(Pipeline::new(loaded.config, store, loaded.catalog, loaded.groups, muxer))
}

fn log_progress(progress: TransferProgress) {
    match progress.state {
        TransferState::Transferring => debug!("{}", progress.display_string()),
        TransferState::Completed => info!(file = %progress.remote_name, "transfer complete"),
        _ => {}
    }
}

async fn run(config_dir: &Path, json: bool) -> Result<bool> {
    let _lock = InstanceLock::acquire().context("acquiring instance lock")?;
    let loaded = load(config_dir)?;

    let cancel = CancellationToken::new();
    let ctx = Arc::new(
        RunContext::new(ProcessedLedger::new(&loaded.config.temp_dir, loaded.config.ledger_match_metadata))
            .with_rule_cache(RuleSourceCache::with_timeouts()?)
            .with_cancel(cancel.clone())
            .with_progress(Arc::new(log_progress)),
    );
    let pipeline = build_pipeline(loaded)?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });

    let report = pipeline.run(ctx).await.context("run failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(!report.has_failures())
}

async fn plan(config_dir: &Path, json: bool) -> Result<bool> {
    let loaded = load(config_dir)?;
    let ctx = RunContext::new(ProcessedLedger::new(&loaded.config.temp_dir, loaded.config.ledger_match_metadata));
    let pipeline = build_pipeline(loaded)?;

    let planned = pipeline.plan(&ctx).await.context("listing remote store")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
    } else {
        for item in &planned {
            println!("{}", item);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    let success = match cli.command {
        Commands::Run => run(&cli.config_dir, cli.json).await?,
        Commands::Plan => plan(&cli.config_dir, cli.json).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
