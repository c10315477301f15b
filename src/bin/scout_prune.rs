//! Standalone retention pass over the state directory.
//! Usage: `scout-prune [--days N]` (default: `retention.horizon_days` from config).

use anyhow::{bail, Context};
use chrono::Utc;

use m365_scout::config::ScoutConfig;
use m365_scout::lock::RunLock;
use m365_scout::logging;
use m365_scout::store::{prune_all, FileStore, Retention};

fn parse_days(args: &[String]) -> anyhow::Result<Option<i64>> {
    match args {
        [] => Ok(None),
        [flag, n] if flag == "--days" => Ok(Some(
            n.parse().with_context(|| format!("--days expects a number, got {n:?}"))?,
        )),
        _ => bail!("usage: scout-prune [--days N]"),
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = ScoutConfig::load_default().context("loading configuration")?;
    let retention = match parse_days(&args)? {
        Some(days) => Retention::days(days)?,
        None => cfg.retention()?,
    };

    let _lock = RunLock::acquire(&cfg.state_dir).context("acquiring run lock")?;
    let store = FileStore::open(&cfg.state_dir).context("opening state")?;
    let report = prune_all(
        retention,
        Utc::now(),
        store.fingerprints.as_ref(),
        store.journal.as_ref(),
        store.deliveries.as_ref(),
    )
    .context("pruning state")?;

    tracing::info!(horizon_days = retention.horizon().num_days(), removed = report.total(), "prune done");
    println!(
        "pruned {} records (fingerprints {}, journal {}, deliveries {})",
        report.total(),
        report.fingerprints,
        report.journal,
        report.deliveries
    );
    Ok(())
}

fn main() {
    let _ = dotenvy::dotenv();
    logging::init();
    if let Err(e) = run() {
        eprintln!("scout-prune: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_flag() {
        assert_eq!(parse_days(&[]).unwrap(), None);
        assert_eq!(parse_days(&["--days".into(), "30".into()]).unwrap(), Some(30));
        assert!(parse_days(&["--days".into(), "x".into()]).is_err());
        assert!(parse_days(&["--bogus".into()]).is_err());
    }
}
