//! Status command implementation

use colored::Colorize;

use super::print_json;
use crate::context::AppContext;
use crate::error::Result;

/// Run the status command
pub async fn run_status(ctx: &AppContext, blog: Option<&str>, json: bool) -> Result<()> {
    let mut statuses = Vec::new();
    for id in ctx.blog_ids(blog)? {
        statuses.push(ctx.service.status(&id).await?);
    }
    if json {
        return print_json(&statuses);
    }

    println!("{}", "Blog Status".bold());
    for status in &statuses {
        println!();
        let provider = ctx
            .settings
            .blog(&status.blog_id)
            .map(|b| b.provider.to_string())
            .unwrap_or_default();
        println!("{} ({})", status.blog_id.cyan().bold(), provider.dimmed());

        match &status.account {
            None => println!("  {}:   {}", "Sync".dimmed(), "never synced".yellow()),
            Some(account) => {
                let last = account
                    .last_sync
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into());
                println!("  {}:   {}", "Last".dimmed(), last);
                if let Some(message) = &account.error_message {
                    println!("  {}:  {}", "Error".dimmed(), message.red());
                }
                if account.resync_requested {
                    println!("  {}", "Resync pending".yellow());
                }
            }
        }

        let lock = if status.lock.held { "held".yellow() } else { "free".green() };
        println!("  {}:   {}", "Lock".dimmed(), lock);
    }
    Ok(())
}
