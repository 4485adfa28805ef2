//! Resync command implementation

use blogsync_core::Direction;
use colored::Colorize;

use super::{print_json, print_report};
use crate::context::AppContext;
use crate::error::Result;

pub async fn run_resync(ctx: &AppContext, blog: &str, direction: Direction, json: bool) -> Result<()> {
    if !json {
        println!(
            "{} Resyncing {} ({})...",
            "=>".blue().bold(),
            blog.cyan(),
            direction.to_string().dimmed()
        );
    }
    let provider = ctx.service.connect(blog)?;
    let report = ctx.service.resync(blog, provider.as_ref(), direction).await?;

    if json {
        print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}
