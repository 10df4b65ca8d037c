//! Interactive review loop over pending edits.

use crate::output::{entry_row, print_entry_diff, TerminalPrompt};
use anyhow::Result;
use console::style;
use hist_core::{
    resolve_conversation_prefix, EditStatus, HistoryError, HistoryStore, Resolution, Reviewer,
};
use std::io::{self, Write};

pub fn run(store: &HistoryStore, conversation: Option<String>) -> Result<()> {
    let conversation = match conversation {
        Some(prefix) => {
            let entries = store.read_all_entries()?;
            match resolve_conversation_prefix(&entries, &prefix) {
                Resolution::Unique(conversation) => Some(conversation),
                Resolution::None => return Err(HistoryError::NoMatch(prefix).into()),
                Resolution::Ambiguous(matches) => {
                    return Err(HistoryError::AmbiguousId {
                        prefix,
                        count: matches.len(),
                    }
                    .into())
                }
            }
        }
        None => None,
    };

    let reviewer = Reviewer::new(store);
    let pending = reviewer.pending_edits(conversation.as_ref())?;

    if pending.is_empty() {
        println!("No pending edits to review.");
        return Ok(());
    }
    println!(
        "{} pending edit(s). Keys: {} accept, {} reject, {} skip, {} quit.",
        pending.len(),
        style("a").green(),
        style("r").red(),
        style("s").yellow(),
        style("q").cyan()
    );

    let prompt = TerminalPrompt;
    let mut decided = 0usize;

    'edits: for entry in &pending {
        println!();
        println!("{}", entry_row(store, entry));
        print_entry_diff(store, entry);

        let choice = loop {
            print!("{} ", style("[a/r/s/q]?").yellow());
            io::stdout().flush()?;
            let mut input = String::new();
            if io::stdin().read_line(&mut input)? == 0 {
                break 'edits;
            }
            match input.trim().to_lowercase().as_str() {
                "a" | "accept" => break Some(EditStatus::Accepted),
                "r" | "reject" => break Some(EditStatus::Rejected),
                "s" | "skip" | "" => break None,
                "q" | "quit" => break 'edits,
                _ => println!("{}", style("Please answer a, r, s or q.").red()),
            }
        };

        let Some(status) = choice else { continue };
        match reviewer.set_edit_status(&entry.edit_id, status, &prompt) {
            Ok(report) => {
                decided += 1;
                super::decision::print_report(&report, status);
            }
            // One failed edit must not end the whole session.
            Err(e) => {
                println!("{} {e}", style("error:").red().bold());
                if let Some(hint) = e.recovery_suggestion() {
                    println!("  {} {hint}", style("hint:").cyan());
                }
            }
        }
    }

    println!();
    println!("Review finished: {decided} decision(s) applied.");
    Ok(())
}
