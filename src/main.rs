use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

use territory_lifecycle::{
    create_config_template, export_csv, load_config, load_facts_csv, load_records,
    load_signals_csv, normalize_account_id, open_database, BatchDriver, EngineConfig, TagCatalog,
    VERSION,
};

const DEFAULT_CONFIG: &str = "territory.toml";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "run" => {
            let config = load(args.get(2))?;
            init_logging(&config);
            run_batch(&config)?;
        }
        "recompute" => {
            let (Some(config_path), Some(account_id)) = (args.get(2), args.get(3)) else {
                bail!("usage: territory-lifecycle recompute <config> <account_id>");
            };
            let config = load(Some(config_path))?;
            init_logging(&config);
            run_recompute(&config, account_id)?;
        }
        "init-config" => {
            let Some(path) = args.get(2) else {
                bail!("usage: territory-lifecycle init-config <path>");
            };
            create_config_template(Path::new(path))?;
            println!("✅ Config template written to {}", path);
        }
        "export" => {
            let config = load(args.get(2))?;
            init_logging(&config);
            run_export(&config)?;
        }
        _ => print_usage(),
    }

    Ok(())
}

fn load(path: Option<&String>) -> Result<EngineConfig> {
    let path = path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    load_config(&path)
}

fn init_logging(config: &EngineConfig) {
    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();
}

fn print_usage() {
    println!("territory-lifecycle {}", VERSION);
    println!();
    println!("USAGE:");
    println!("  territory-lifecycle run [config]                  Classify, rank and tag every account");
    println!("  territory-lifecycle recompute <config> <account>  Recompute a single account");
    println!("  territory-lifecycle init-config <path>            Write a config template");
    println!("  territory-lifecycle export [config]               Export materialized records to CSV");
    println!();
    println!("Config defaults to ./{}", DEFAULT_CONFIG);
}

fn run_batch(config: &EngineConfig) -> Result<()> {
    println!("🏷️  Territory Lifecycle - Batch Run");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let registry = config.registry()?;

    // 1. Load facts
    println!("\n📂 Loading facts...");
    let mut load = load_facts_csv(&config.paths.facts, &registry)?;
    println!("✓ Loaded {} accounts", load.snapshots.len());

    if let Some(signals) = &config.paths.signals {
        if signals.exists() {
            let count = load_signals_csv(signals, &mut load)?;
            println!("✓ Loaded {} signal rows", count);
        } else {
            info!(path = %signals.display(), "signals file not found, skipping");
        }
    }

    // 2. Setup database
    println!("\n🔧 Setting up database...");
    let conn = open_database(&config.paths.database)?;
    let catalog = TagCatalog::resolve(&conn)?;
    println!("✓ Database initialized with WAL mode");

    // 3. Classify, rank, materialize, tag
    println!("\n⚙️  Processing accounts ({} workers)...", config.batch.workers);
    let driver = BatchDriver::from_config(config)?;
    let report = driver.run_load(&conn, &catalog, load)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ {}", report.summary());
    if report.is_clean() {
        println!("✅ Run {} complete", report.run_id);
    } else {
        println!(
            "⚠️  Run {} finished with {} failures, {} skipped rows:",
            report.run_id,
            report.failures.len(),
            report.skipped_rows.len()
        );
        for failure in &report.failures {
            println!("   ❌ {}: {}", failure.account_id, failure.error);
        }
        for row in &report.skipped_rows {
            println!("   ⏭️  {} row {}: {}", row.source, row.row, row.reason);
        }
    }

    Ok(())
}

fn run_recompute(config: &EngineConfig, raw_account_id: &str) -> Result<()> {
    let account_id = normalize_account_id(raw_account_id)?;
    let registry = config.registry()?;

    let mut load = load_facts_csv(&config.paths.facts, &registry)?;
    if let Some(signals) = config.paths.signals.as_ref().filter(|p| p.exists()) {
        load_signals_csv(signals, &mut load)?;
    }

    let snapshot = load
        .snapshots
        .into_iter()
        .find(|s| s.account_id == account_id)
        .with_context(|| format!("Account {} not found in facts", account_id))?;

    let conn = open_database(&config.paths.database)?;
    let catalog = TagCatalog::resolve(&conn)?;
    let driver = BatchDriver::from_config(config)?;
    let outcome = driver.recompute_account(&conn, &catalog, &snapshot)?;

    println!("🔁 Account {}", outcome.account_id);
    for cell in outcome.lifecycle.cells_at(driver.current_period()) {
        println!("   {:<12} {:<8} {}", cell.vendor, cell.period, cell.label);
    }
    match outcome.ranking.winner() {
        Some(winner) => println!(
            "   🏆 dominant: {} ({}, ${:.2})",
            winner.vendor, winner.period, winner.aggregate
        ),
        None => println!("   🏆 dominant: none"),
    }
    let tags: Vec<&str> = outcome.tags.iter().map(|t| t.name()).collect();
    println!("   🔖 tags: {}", tags.join(", "));

    Ok(())
}

fn run_export(config: &EngineConfig) -> Result<()> {
    let conn = open_database(&config.paths.database)?;
    let records = load_records(&conn)?;
    let written = export_csv(&config.paths.export, &records)?;

    println!("✅ Exported {} records to {}", written, config.paths.export.display());
    Ok(())
}
