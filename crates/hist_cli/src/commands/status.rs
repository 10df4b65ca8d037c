//! List history entries.

use crate::output::{entry_row, print_listing_header};
use anyhow::Result;
use chrono::Utc;
use console::style;
use hist_core::{filter_entries, parse_time_span, EntryFilter, HistoryStore};

#[allow(clippy::too_many_arguments)]
pub fn run(
    store: &HistoryStore,
    conversation: Option<String>,
    file: Option<String>,
    status: Option<String>,
    operation: Option<String>,
    time: Option<String>,
    limit: usize,
) -> Result<()> {
    let filter = EntryFilter {
        conversation,
        file,
        status: status.as_deref().map(str::parse).transpose()?,
        operation: operation.as_deref().map(str::parse).transpose()?,
        max_age: time.as_deref().map(parse_time_span).transpose()?,
        limit: if limit == 0 { None } else { Some(limit) },
    };

    let entries = store.read_all_entries()?;
    let matched = filter_entries(&entries, &filter, Utc::now());

    if matched.is_empty() {
        println!("No matching edits.");
        return Ok(());
    }

    print_listing_header();
    for entry in &matched {
        println!("{}", entry_row(store, entry));
    }

    let pending = matched
        .iter()
        .filter(|e| e.status == hist_core::EditStatus::Pending)
        .count();
    println!();
    println!(
        "{} entries shown, {} pending",
        matched.len(),
        if pending > 0 {
            style(pending).yellow().to_string()
        } else {
            pending.to_string()
        }
    );

    Ok(())
}
