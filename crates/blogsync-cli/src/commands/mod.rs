//! Command implementations

mod lock;
mod rebuild;
mod resync;
mod status;
mod sync;

pub use lock::run_lock;
pub use rebuild::run_rebuild;
pub use resync::run_resync;
pub use status::run_status;
pub use sync::run_sync;

use blogsync_core::SyncReport;
use colored::Colorize;
use serde::Serialize;

use crate::error::Result;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Human-readable report shared by sync, resync and rebuild.
pub(crate) fn print_report(report: &SyncReport) {
    let marker = if report.is_clean() {
        "OK".green().bold()
    } else {
        "PARTIAL".yellow().bold()
    };
    println!("{} {}: {}", marker, report.blog_id.cyan(), report.summary());

    for path in &report.applied.deleted {
        println!("   {} {}", "-".red(), path);
    }
    for path in report.applied.created_dirs.iter().chain(&report.applied.downloaded) {
        println!("   {} {}", "+".green(), path);
    }
    for path in &report.applied.placeholders {
        println!("   {} {} {}", "~".yellow(), path, "(placeholder)".dimmed());
    }
    if let Some(pushed) = &report.pushed {
        for path in &pushed.deleted {
            println!("   {} {} {}", "-".red(), path, "(remote)".dimmed());
        }
        for path in pushed.created_dirs.iter().chain(&pushed.uploaded) {
            println!("   {} {} {}", "^".green(), path, "(remote)".dimmed());
        }
        for failure in &pushed.failures {
            println!("   {} {}: {}", "!".red(), failure.path, failure.message);
        }
    }
    for failure in &report.applied.failures {
        println!("   {} {}: {}", "!".red(), failure.path, failure.message);
    }
    for failure in &report.update_failures {
        println!("   {} {}", "!".red(), failure);
    }
}
