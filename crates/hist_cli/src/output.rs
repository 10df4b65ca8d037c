//! Terminal rendering: entry listings, coloured diffs, interactive prompts.

use console::style;
use hist_core::{
    EditEntry, EditStatus, ExternalChange, HistoryStore, OperationKind, ReviewPrompt,
};
use std::io::{self, Write};

/// Prints the header row for entry listings.
pub fn print_listing_header() {
    println!(
        "{}",
        style(format!(
            "{:<19}  {:<8}  {:<8}  {:<9}  {:<8}  {}",
            "Time", "Edit ID", "Conv ID", "Operation", "Status", "File Path"
        ))
        .cyan()
    );
    println!("{}", "-".repeat(100));
}

/// Formats one entry as a listing row.
pub fn entry_row(store: &HistoryStore, entry: &EditEntry) -> String {
    let time = entry.timestamp.format("%Y-%m-%d %H:%M:%S");

    let path = match entry.op.source_path() {
        Some(source) => format!(
            "{} -> {}",
            store.workspace_relative(source),
            store.workspace_relative(entry.op.file_path())
        ),
        None => store.workspace_relative(entry.op.file_path()),
    };

    let op = entry.op.kind();
    let op_styled = match op {
        OperationKind::Create => style(format!("{op:<9}")).green(),
        OperationKind::Replace => style(format!("{op:<9}")).yellow(),
        OperationKind::Edit => style(format!("{op:<9}")).blue(),
        OperationKind::Delete => style(format!("{op:<9}")).red(),
        OperationKind::Move => style(format!("{op:<9}")).cyan(),
    };

    let status = entry.status;
    let status_styled = match status {
        EditStatus::Pending => style(format!("{status:<8}")).yellow(),
        EditStatus::Accepted => style(format!("{status:<8}")).green(),
        EditStatus::Rejected => style(format!("{status:<8}")).red(),
    };

    format!(
        "{time:<19}  {:<8}  {:<8}  {op_styled}  {status_styled}  {path}",
        entry.edit_id.short(),
        entry.conversation_id.short(),
    )
}

/// Prints a unified diff with the usual colouring.
pub fn print_diff(diff: &str) {
    if diff.is_empty() {
        println!("{}", style("(no content change)").yellow());
        return;
    }
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            println!("{}", style(line).blue());
        } else if let Some(rest) = line.strip_prefix('+') {
            println!("{}", style(format!("+{rest}")).green());
        } else if let Some(rest) = line.strip_prefix('-') {
            println!("{}", style(format!("-{rest}")).red());
        } else if line.starts_with("@@") {
            println!("{}", style(line).cyan());
        } else {
            println!("{line}");
        }
    }
}

/// Prints an entry's diff, or an operation summary for diff-less entries.
pub fn print_entry_diff(store: &HistoryStore, entry: &EditEntry) {
    if let Some(rel) = entry.op.diff_file() {
        match store.read_diff(rel) {
            Ok(diff) => print_diff(&diff),
            Err(e) => println!("{}", style(format!("diff unavailable: {e}")).yellow()),
        }
        return;
    }

    match entry.op.kind() {
        OperationKind::Move => {
            println!("OPERATION: MOVE");
            println!(
                "Source: {}",
                store.workspace_relative(entry.op.source_path().unwrap_or(entry.op.file_path()))
            );
            println!(
                "Destination: {}",
                store.workspace_relative(entry.op.file_path())
            );
        }
        OperationKind::Delete => {
            println!("OPERATION: DELETE");
            println!("File: {}", store.workspace_relative(entry.op.file_path()));
        }
        other => {
            println!("OPERATION: {}", other.to_string().to_uppercase());
            println!("(no diff file associated)");
        }
    }
}

/// Interactive prompt backed by stdin/stdout.
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_line(&self) -> Option<String> {
        let mut input = String::new();
        io::stdin().read_line(&mut input).ok()?;
        Some(input.trim().to_lowercase())
    }
}

impl ReviewPrompt for TerminalPrompt {
    fn confirm_discard(&self, change: &ExternalChange) -> bool {
        println!();
        println!(
            "{} {} was modified outside the edit history.",
            style("⚠").yellow().bold(),
            change.path.display()
        );
        println!(
            "  expected: {}",
            change
                .expected
                .map(|h| h.as_hex())
                .unwrap_or_else(|| "absent".into())
        );
        println!(
            "  on disk:  {}",
            change
                .actual
                .map(|h| h.as_hex())
                .unwrap_or_else(|| "absent".into())
        );
        if let Some(diff) = &change.diff {
            println!();
            println!("{}", style("External changes:").cyan());
            print_diff(diff);
        }

        loop {
            print!(
                "\n{} ",
                style("Proceed and discard these external changes? [y/N]:").yellow()
            );
            if io::stdout().flush().is_err() {
                return false;
            }
            match self.read_line().as_deref() {
                Some("y") | Some("yes") => return true,
                Some("n") | Some("no") | Some("") | None => return false,
                Some(_) => println!("{}", style("Please answer y or n.").red()),
            }
        }
    }

    fn choose(&self, prompt: &str, candidates: &[String]) -> Option<usize> {
        println!("{} {prompt}:", style("?").cyan().bold());
        for (i, candidate) in candidates.iter().enumerate() {
            println!("  {} {candidate}", style(format!("[{}]", i + 1)).cyan());
        }

        loop {
            print!(
                "{} ",
                style(format!("Select 1-{} or q to cancel:", candidates.len())).yellow()
            );
            if io::stdout().flush().is_err() {
                return None;
            }
            match self.read_line().as_deref() {
                Some("q") | Some("quit") | None => return None,
                Some(input) => match input.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= candidates.len() => return Some(n - 1),
                    _ => println!("{}", style("Invalid selection.").red()),
                },
            }
        }
    }
}
