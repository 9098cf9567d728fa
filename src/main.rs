use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;

use pozo_familiar::{
    backup_to, count_movements, list_contributors, list_movements, open_ledger,
    restore_from, verify_reference_amounts, SettlementConfig, SettlementEngine, Summary,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        None => run_report(false),
        Some("report") => run_report(args.iter().any(|a| a == "--json")),
        Some("backup") => run_backup(args.get(2).map(String::as_str)),
        Some("restore") => run_restore(args.get(2).map(String::as_str)),
        Some("help") | Some("--help") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command `{other}`")
        }
    }
}

fn db_path() -> PathBuf {
    env::var("POZO_DB")
        .unwrap_or_else(|_| "pozo-familiar.db".to_string())
        .into()
}

fn run_report(as_json: bool) -> Result<()> {
    let path = db_path();
    let conn = open_ledger(&path)?;
    let engine = SettlementEngine::new(SettlementConfig::from_env()?);
    let contributors = list_contributors(&conn)?;
    let movements = list_movements(&conn)?;
    let summary = engine.settle(&contributors, &movements);

    if as_json {
        // Same payload the web API serves; handy for scripts.
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("🏦 Pozo Familiar - Settlement Report");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Ledger opened: {}", path.display());
    println!(
        "✓ Settled {} movements under `{}` policy",
        summary.movement_count,
        summary.policy.as_str()
    );

    let drifts = verify_reference_amounts(&conn)?;
    if !drifts.is_empty() {
        println!("\n⚠️  {} movement(s) carry a stale reference amount:", drifts.len());
        for drift in &drifts {
            println!(
                "   #{}: stored {:.2}, should be {:.2}",
                drift.movement_id, drift.stored, drift.recomputed
            );
        }
    }

    print_contributors(&summary);
    print_sibling_equity(&summary);
    print_totals(&summary);
    print_banks(&summary);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ {}", summary.headline());

    Ok(())
}

fn print_contributors(summary: &Summary) {
    println!("\n📊 Contributors");
    println!(
        "   {:<10} {:<10} {:>14} {:>14} {:>12} {:>10}",
        "Name", "Role", "Aportes (loc)", "Aportes (ref)", "Balance", "Rate"
    );
    for row in &summary.contributors {
        let rate = row
            .implied_rate
            .map(|r| format!("{r:.2}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {:<10} {:<10} {:>14.2} {:>14.2} {:>12.2} {:>10}",
            row.name,
            row.role.as_str(),
            row.contributed_local,
            row.contributed_reference,
            row.balance,
            rate
        );
    }
}

fn print_sibling_equity(summary: &Summary) {
    if summary.sibling_equity.is_empty() {
        return;
    }
    println!(
        "\n⚖️  Sibling equity (average balance {:.2})",
        summary.average_balance
    );
    for row in &summary.sibling_equity {
        let standing = if row.equity_delta > 0.0 {
            "ahead of the group"
        } else if row.equity_delta < 0.0 {
            "behind the group"
        } else {
            "even with the group"
        };
        println!(
            "   {:<10} balance {:>12.2}   {:>+12.2} ({standing})",
            row.name, row.balance, row.equity_delta
        );
    }
}

fn print_totals(summary: &Summary) {
    println!("\n💰 Totals (reference currency)");
    println!(
        "   Contributions:      {:>12.2}",
        summary.total_contributed_reference
    );
    println!(
        "   Household expenses: {:>12.2} (covered by household balance: {:.2})",
        summary.total_household_expense, summary.household_covered
    );
    println!(
        "   Sibling assets:     {:>12.2}",
        summary.total_sibling_asset_expense
    );
    println!("   Fair share:         {:>12.2}", summary.fair_share);
    println!("   Pool balance:       {:>12.2}", summary.pooled_balance);
}

fn print_banks(summary: &Summary) {
    if summary.bank_balances.is_empty() {
        return;
    }
    println!("\n🏛️  Bank accounts (local currency)");
    for (bank, balance) in &summary.bank_balances {
        println!("   {bank:<16} {balance:>12.2}");
    }
}

fn run_backup(dest: Option<&str>) -> Result<()> {
    let dest = match dest {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(format!(
            "pozo-backup-{}.db",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        )),
    };
    // VACUUM INTO refuses to overwrite; check up front for a clearer message.
    if dest.exists() {
        bail!("backup destination `{}` already exists", dest.display());
    }

    let path = db_path();
    let conn = open_ledger(&path)?;
    backup_to(&conn, &dest)?;
    let count = count_movements(&conn)?;
    println!("✓ Backed up {} movements to {}", count, dest.display());

    Ok(())
}

fn run_restore(src: Option<&str>) -> Result<()> {
    let Some(src) = src else {
        bail!("usage: pozo-familiar restore <backup-file>");
    };
    let src = Path::new(src);
    let path = db_path();

    restore_from(src, &path)?;

    // Reopen to prove the restored file is a usable ledger.
    let conn = open_ledger(&path)?;
    let count = count_movements(&conn)?;
    println!(
        "✓ Restored {} from {} ({} movements)",
        path.display(),
        src.display(),
        count
    );

    Ok(())
}

fn print_usage() {
    println!("Pozo Familiar - household ledger");
    println!();
    println!("Usage: pozo-familiar [command]");
    println!();
    println!("Commands:");
    println!("  report [--json]    Settle the ledger and print the family report (default)");
    println!("  backup [dest]      Snapshot the ledger (default name is datestamped)");
    println!("  restore <backup>   Replace the ledger with a snapshot");
    println!("  help               Show this message");
    println!();
    println!("Environment:");
    println!("  POZO_DB         Ledger file (default: pozo-familiar.db)");
    println!("  POZO_PORT       Web server port (default: 3000)");
    println!("  POZO_HOUSEHOLD  Household member name (default: Emilse)");
    println!("  POZO_SIBLINGS   Comma-separated sibling names");
    println!("  POZO_POLICY     equal-split | deplete-household-first");
    println!();
    println!("Web UI: cargo run --bin pozo-server --features server");
}
