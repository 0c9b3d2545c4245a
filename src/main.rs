use anyhow::{bail, Context, Result};
use std::env;
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

// Use library instead of local modules
use jeton::{
    get_cap_table, open_database, share_summary, verify_ledger, write_cap_table_csv, AppConfig,
    HolderType, NoValuationCache,
};

const USAGE: &str = "Usage: jeton <command>

Commands:
  init                              Create the database schema and default share configuration
  shares                            Show authorized/issued shares and price per share
  cap-table [--type T] [--csv PATH] Print the cap table, or export it as CSV
  valuation                         Show the strategic company value
  verify-ledger                     Recompute the share transaction hash chain";

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = AppConfig::load()?;

    match args.first().map(String::as_str) {
        Some("init") => run_init(&config),
        Some("shares") => run_shares(&config),
        Some("cap-table") => run_cap_table(&config, &args[1..]),
        Some("valuation") => run_valuation(&config),
        Some("verify-ledger") => run_verify(&config),
        _ => {
            println!("jeton {}\n\n{}", jeton::VERSION, USAGE);
            Ok(())
        }
    }
}

fn run_init(config: &AppConfig) -> Result<()> {
    println!("🗄️  Initializing Jeton database at {}", config.db_path.display());
    let conn = open_database(&config.db_path)?;
    let shares = jeton::get_configuration(&conn)?;

    println!("✓ Schema ready (WAL mode)");
    println!(
        "✓ Shares: {} authorized, {} issued, par value {:.2}",
        shares.authorized_shares, shares.issued_shares, shares.par_value
    );
    Ok(())
}

fn run_shares(config: &AppConfig) -> Result<()> {
    let conn = open_database(&config.db_path)?;
    let summary = share_summary(&conn, &NoValuationCache)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_valuation(config: &AppConfig) -> Result<()> {
    let conn = open_database(&config.db_path)?;
    let valuation = jeton::compute_valuation(&conn)?;
    println!("{}", serde_json::to_string_pretty(&valuation)?);
    Ok(())
}

fn run_cap_table(config: &AppConfig, args: &[String]) -> Result<()> {
    let mut holder_type = None;
    let mut csv_path: Option<PathBuf> = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--type" => {
                let value = iter.next().context("--type needs a value")?;
                holder_type = Some(HolderType::parse(value)?);
            }
            "--csv" => {
                let value = iter.next().context("--csv needs a path")?;
                csv_path = Some(PathBuf::from(value));
            }
            other => bail!("Unknown option: {}\n\n{}", other, USAGE),
        }
    }

    let conn = open_database(&config.db_path)?;
    let today = chrono::Utc::now().date_naive();
    let cap_table = get_cap_table(&conn, &NoValuationCache, holder_type, today)?;

    match csv_path {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_cap_table_csv(&cap_table, file)?;
            println!(
                "✓ Exported {} holdings to {}",
                cap_table.shareholders.len(),
                path.display()
            );
        }
        None => println!("{}", serde_json::to_string_pretty(&cap_table)?),
    }

    Ok(())
}

fn run_verify(config: &AppConfig) -> Result<()> {
    let conn = open_database(&config.db_path)?;
    let report = verify_ledger(&conn)?;

    if report.valid {
        println!("✅ Share ledger intact: {} entries verified", report.entries_checked);
        Ok(())
    } else {
        bail!(
            "❌ Share ledger broken at entry {} ({} entries checked)",
            report.first_broken_entry.unwrap_or_default(),
            report.entries_checked
        )
    }
}
