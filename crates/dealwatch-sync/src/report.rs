use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::orchestrator::SyncRunStats;

pub fn render_daily_brief(stats: &SyncRunStats) -> String {
    let mut lines = vec![
        "# Deal Watch Sync Brief".to_string(),
        String::new(),
        format!("- run_id: `{}`", stats.run_id),
        format!("- started_at: {}", stats.started_at.to_rfc3339()),
        format!("- finished_at: {}", stats.finished_at.to_rfc3339()),
        format!("- scanned: {}", stats.scanned),
        format!("- created: {}", stats.created),
        format!("- updated: {}", stats.updated),
        format!("- price drops: {}", stats.price_drops),
        format!("- broadcasts: {}", stats.broadcasts),
        format!("- notifications sent: {}", stats.notifications_sent),
        format!("- deactivated: {}", stats.deactivated),
        format!("- errors: {}", stats.errors),
        String::new(),
        "## Categories".to_string(),
        String::new(),
        "| category | scanned | created | updated | drops | errors |".to_string(),
        "|---|---:|---:|---:|---:|---:|".to_string(),
    ];
    for (name, c) in &stats.categories {
        lines.push(format!(
            "| {name} | {} | {} | {} | {} | {} |",
            c.scanned, c.created, c.updated, c.price_drops, c.errors
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Writes `<dir>/<run_id>/sync_run.json` and `daily_brief.md`; returns the run directory.
pub async fn write_run_report(dir: &Path, stats: &SyncRunStats) -> Result<PathBuf> {
    let run_dir = dir.join(stats.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(stats).context("serializing sync stats")?;
    fs::write(run_dir.join("sync_run.json"), json)
        .await
        .context("writing sync_run.json")?;
    fs::write(run_dir.join("daily_brief.md"), render_daily_brief(stats))
        .await
        .context("writing daily_brief.md")?;
    Ok(run_dir)
}
