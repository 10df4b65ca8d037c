//! Accept or reject edits and re-materialize the affected files.

use crate::output::TerminalPrompt;
use anyhow::{anyhow, Result};
use console::style;
use hist_core::{
    resolve_conversation_prefix, resolve_edit_prefix, EditStatus, HistoryError, HistoryStore,
    Resolution, ReviewPrompt, ReviewReport, Reviewer,
};

pub fn run(
    store: &HistoryStore,
    edit: Option<String>,
    conversation: Option<String>,
    accept: bool,
) -> Result<()> {
    let status = if accept {
        EditStatus::Accepted
    } else {
        EditStatus::Rejected
    };
    let entries = store.read_all_entries()?;
    let reviewer = Reviewer::new(store);
    let prompt = TerminalPrompt;

    let report = if let Some(prefix) = edit {
        let edit_id = match resolve_edit_prefix(&entries, &prefix) {
            Resolution::Unique(entry) => entry.edit_id.clone(),
            Resolution::None => return Err(HistoryError::NoMatch(prefix).into()),
            Resolution::Ambiguous(matches) => {
                let labels: Vec<String> = matches
                    .iter()
                    .map(|e| {
                        format!(
                            "{} {} {}",
                            e.edit_id.short(),
                            e.op.kind(),
                            store.workspace_relative(e.op.file_path())
                        )
                    })
                    .collect();
                let count = matches.len();
                let chosen = prompt
                    .choose(&format!("edit id '{prefix}' is ambiguous"), &labels)
                    .ok_or(HistoryError::AmbiguousId { prefix, count })?;
                matches[chosen].edit_id.clone()
            }
        };
        reviewer.set_edit_status(&edit_id, status, &prompt)?
    } else {
        let prefix = conversation.ok_or_else(|| anyhow!("pass -e EDIT or -c CONV"))?;
        let conversation = match resolve_conversation_prefix(&entries, &prefix) {
            Resolution::Unique(conversation) => conversation,
            Resolution::None => return Err(HistoryError::NoMatch(prefix).into()),
            Resolution::Ambiguous(matches) => {
                let labels: Vec<String> = matches
                    .iter()
                    .map(|c| format!("conversation {}", c.short()))
                    .collect();
                let count = matches.len();
                let chosen = prompt
                    .choose(&format!("conversation id '{prefix}' is ambiguous"), &labels)
                    .ok_or(HistoryError::AmbiguousId { prefix, count })?;
                matches[chosen].clone()
            }
        };
        reviewer.set_conversation_status(&conversation, status, &prompt)?
    };

    print_report(&report, status);
    Ok(())
}

pub fn print_report(report: &ReviewReport, status: EditStatus) {
    if report.changed.is_empty() {
        println!("Nothing to do: status already {status}.");
        return;
    }

    let verb = match status {
        EditStatus::Accepted => style("Accepted").green(),
        EditStatus::Rejected => style("Rejected").red(),
        EditStatus::Pending => style("Reset").yellow(),
    };
    println!(
        "{verb} {} edit(s) in conversation {}.",
        report.changed.len(),
        report.conversation.short()
    );

    for file in &report.files {
        match file.final_hash {
            Some(hash) => println!(
                "  {} {} ({})",
                style("✓").green(),
                file.path.display(),
                hash.short()
            ),
            None => println!("  {} {} (removed)", style("✓").green(), file.path.display()),
        }
        if let Some(warning) = &file.warning {
            println!("  {} {warning}", style("⚠").yellow());
        }
    }
}
