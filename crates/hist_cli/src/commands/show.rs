//! Print the diff(s) of an edit or conversation.

use crate::output::{entry_row, print_entry_diff, TerminalPrompt};
use anyhow::{anyhow, Result};
use console::style;
use hist_core::{resolve_target, HistoryStore, ReviewTarget};

pub fn run(store: &HistoryStore, id: &str) -> Result<()> {
    let entries = store.read_all_entries()?;
    let target = resolve_target(&entries, id, &TerminalPrompt)?;

    match target {
        ReviewTarget::Edit(edit_id) => {
            let entry = entries
                .iter()
                .find(|e| e.edit_id == edit_id)
                .ok_or_else(|| anyhow!("edit {edit_id} disappeared while resolving"))?;
            println!("{}", entry_row(store, entry));
            println!();
            print_entry_diff(store, entry);
        }
        ReviewTarget::Conversation(conversation) => {
            let log = store.read_log(&conversation)?;
            println!(
                "{} {} ({} edits)",
                style("Conversation").cyan().bold(),
                conversation,
                log.len()
            );
            for entry in &log {
                println!();
                println!("{}", entry_row(store, entry));
                print_entry_diff(store, entry);
            }
        }
    }

    Ok(())
}
