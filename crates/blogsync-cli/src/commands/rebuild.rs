//! Rebuild command implementation

use colored::Colorize;

use super::{print_json, print_report};
use crate::context::AppContext;
use crate::error::Result;

pub async fn run_rebuild(ctx: &AppContext, blog: &str, json: bool) -> Result<()> {
    ctx.blog_ids(Some(blog))?;
    if !json {
        println!("{} Rebuilding entries of {}...", "=>".blue().bold(), blog.cyan());
    }
    let report = ctx.service.rebuild(blog).await?;

    if json {
        print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}
