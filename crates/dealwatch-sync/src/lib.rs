//! Deal sync orchestration: catalog scans, private notifications, public broadcasts
//! and the six-hourly schedule that drives them.

mod bootstrap;
mod broadcast;
mod config;
mod notify;
mod orchestrator;
mod report;
mod schedule;

use anyhow::Result;

pub use bootstrap::{platforms_from_env, AppContext};
pub use broadcast::{
    BroadcastOrchestrator, DigestReport, ShareReport, ShareSummary, SharingStats, DIGEST_PLATFORMS, DIGEST_TITLE,
    DIGEST_TRACKED_PLATFORMS, REDDIT_DIGEST_POSTS,
};
pub use config::{load_categories, CatalogKind, CategoryRegistry, StoreKind, SyncConfig};
pub use notify::{ChannelTally, FanoutReport, NotificationFanout};
pub use orchestrator::{CategoryStats, SyncOrchestrator, SyncOutcome, SyncRunStats};
pub use report::{render_daily_brief, write_run_report};
pub use schedule::{
    build_scheduler, next_sync_after, parse_timezone, spawn_startup_run, ScheduleConfig, DEFAULT_TIMEZONE, SYNC_CRON, SYNC_SLOTS,
};

pub const CRATE_NAME: &str = "dealwatch-sync";

pub async fn run_sync_once_from_env() -> Result<SyncOutcome> {
    let ctx = AppContext::from_env().await?;
    ctx.orchestrator.run_once().await
}
