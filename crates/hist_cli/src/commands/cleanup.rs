//! Stale lock cleanup.

use anyhow::Result;
use console::style;
use hist_core::{HistoryStore, Reviewer};

pub fn run(store: &HistoryStore) -> Result<()> {
    let reviewer = Reviewer::new(store);
    let cleaned = reviewer.cleanup(store.config().locks.stale_min_age())?;

    if cleaned == 0 {
        println!("No stale locks found.");
    } else {
        println!(
            "{} Reclaimed {cleaned} stale lock(s).",
            style("✓").green()
        );
    }
    Ok(())
}
