//! Terminal reporting for a running turn.

use lumina_core::{FileStatus, TurnObserver, TurnOutcome, VirtualFile};
use std::collections::HashMap;

/// Prints a line each time a file changes status.
#[derive(Debug, Default)]
pub struct StatusPrinter {
    quiet: bool,
    last: HashMap<String, FileStatus>,
}

impl StatusPrinter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            last: HashMap::new(),
        }
    }
}

impl TurnObserver for StatusPrinter {
    fn on_status(&mut self, file: &VirtualFile) {
        if self.last.get(&file.name) == Some(&file.status) {
            return;
        }
        self.last.insert(file.name.clone(), file.status);
        if !self.quiet {
            println!("  {} {}", status_label(file.status), file.name);
        }
    }

    fn on_warning(&mut self, message: &str) {
        tracing::warn!(%message, "Turn warning");
        if !self.quiet {
            eprintln!("warning: {}", message);
        }
    }
}

fn status_label(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Pending => "…",
        FileStatus::Success => "✓",
        FileStatus::Error => "✗",
    }
}

/// Human-readable end-of-turn summary.
pub fn print_outcome(outcome: &TurnOutcome) {
    let elapsed = outcome.finished_at - outcome.started_at;
    println!();
    println!(
        "Turn {} {} in {}ms",
        outcome.id,
        if outcome.cancelled { "cancelled" } else { "finished" },
        elapsed.num_milliseconds()
    );

    for file in outcome.files.iter() {
        match &file.error {
            Some(reason) if file.status == FileStatus::Error => {
                println!("  {} {} ({})", status_label(file.status), file.name, reason)
            }
            _ => println!("  {} {}", status_label(file.status), file.name),
        }
    }

    if !outcome.dependencies.is_empty() {
        println!("Dependencies:");
        for (name, spec) in outcome.dependencies.iter() {
            println!("  {}@{}", name, spec);
        }
    }
    if !outcome.summary.is_empty() {
        println!();
        println!("{}", outcome.summary.trim());
    }
}
