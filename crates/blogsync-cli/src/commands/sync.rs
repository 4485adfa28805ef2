//! Sync command implementation

use std::sync::Arc;

use blogsync_delta::RemoteProvider;
use colored::Colorize;
use serde_json::json;

use super::{print_json, print_report};
use crate::context::AppContext;
use crate::error::{CliError, Result};

/// Run the sync command
///
/// A single blog propagates its error (lock contention included) so the
/// exit status reflects it. Several blogs are synced concurrently and
/// reported one by one.
pub async fn run_sync(ctx: &AppContext, blog: Option<&str>, json: bool) -> Result<()> {
    let ids = ctx.blog_ids(blog)?;

    if let Some(id) = blog {
        if !json {
            println!("{} Syncing {}...", "=>".blue().bold(), id.cyan());
        }
        let provider = ctx.service.connect(id)?;
        let report = ctx.service.sync(id, provider.as_ref()).await?;
        if json {
            return print_json(&report);
        }
        print_report(&report);
        return Ok(());
    }

    if !json {
        println!("{} Syncing {} blog(s)...", "=>".blue().bold(), ids.len());
    }
    let mut jobs: Vec<(String, Arc<dyn RemoteProvider>)> = Vec::new();
    for id in &ids {
        jobs.push((id.clone(), ctx.service.connect(id)?));
    }
    let results = Arc::clone(&ctx.service).sync_many(jobs).await;

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if json {
        let rows: Vec<_> = results
            .iter()
            .map(|(id, result)| match result {
                Ok(report) => json!({ "blog_id": id, "report": report }),
                Err(e) => json!({ "blog_id": id, "error": e.to_string(), "code": e.code() }),
            })
            .collect();
        print_json(&rows)?;
    } else {
        for (id, result) in &results {
            match result {
                Ok(report) => print_report(report),
                Err(e) if e.is_lock_unavailable() => {
                    println!("{} {}: {}", "BUSY".yellow().bold(), id.cyan(), e)
                }
                Err(e) => println!("{} {}: {}", "FAILED".red().bold(), id.cyan(), e),
            }
        }
    }

    if failed > 0 {
        return Err(CliError::user(format!("{failed} of {} blog(s) failed to sync", results.len())));
    }
    Ok(())
}
