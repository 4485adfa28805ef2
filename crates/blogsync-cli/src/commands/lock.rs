//! Lock command implementation

use colored::Colorize;

use super::print_json;
use crate::context::AppContext;
use crate::error::Result;

/// Show whether a blog folder lock is held and how fresh it is.
pub async fn run_lock(ctx: &AppContext, blog: &str, json: bool) -> Result<()> {
    let info = ctx.service.lock().inspect(blog).await?;
    if json {
        return print_json(&info);
    }

    let state = match (info.held, info.stale) {
        (false, _) => "free".green(),
        (true, false) => "held".yellow(),
        (true, true) => "stale".red(),
    };
    println!("{}:  {}", "Blog".dimmed(), info.blog_id.cyan());
    println!("{}:  {}", "Lock".dimmed(), state);
    if let Some(path) = &info.path {
        println!("{}:  {}", "File".dimmed(), path.display());
    }
    if let Some(age) = info.age {
        println!("{}:   {}ms since last renewal", "Age".dimmed(), age.as_millis());
    }
    Ok(())
}
