//! World watcher: looks for hunted players inside the level window on one
//! world, auto-tracking HICH characters it has not seen before.

use super::{scan_world, track_new_hich};
use crate::api::{ApiError, GameApi};
use crate::hunted::LevelWindow;
use crate::notify::{deliver, StatusMessage};
use crate::poll::{CycleContext, CycleFlow, PollJob};
use crate::store::TrackerFile;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{info, warn};

pub struct WorldWatcher {
    api: Arc<dyn GameApi>,
    tracker: TrackerFile,
    world: String,
    window: LevelWindow,
    status: StatusMessage,
}

impl WorldWatcher {
    pub fn new(
        api: Arc<dyn GameApi>,
        tracker: TrackerFile,
        world: impl Into<String>,
        window: LevelWindow,
    ) -> Self {
        Self {
            api,
            tracker,
            world: world.into(),
            window,
            status: StatusMessage::new(),
        }
    }

    async fn cycle(&mut self, ctx: &CycleContext) -> anyhow::Result<CycleFlow> {
        let sink = ctx.notifier.as_ref();
        if !ctx.one_shot {
            let text = format!(
                "🔍 Scanning world `{}` (Scan #{}) at {}",
                self.world,
                ctx.cycle,
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            );
            self.status.update(sink, &text).await;
        }

        let scan = match scan_world(self.api.as_ref(), &self.world, self.window, Some(&ctx.cancel)).await
        {
            Ok(scan) => scan,
            Err(ApiError::NoData(_)) => {
                warn!(world = %self.world, "no data for world, stopping");
                deliver(sink, &format!("⚠️ No data found for world `{}`.", self.world)).await;
                return Ok(CycleFlow::Finish);
            }
            Err(e) => return Err(e.into()),
        };

        let added = track_new_hich(&self.tracker, &scan.matches).await?;
        info!(
            world = %self.world,
            checked = scan.checked,
            failed = scan.failed,
            found = scan.matches.len(),
            added = added.len(),
            "world scan done"
        );

        if scan.matches.is_empty() {
            if ctx.one_shot {
                deliver(
                    sink,
                    &format!(
                        "⛔ No level `{}` hunted players found in `{}`.",
                        self.window, self.world
                    ),
                )
                .await;
            }
            return Ok(CycleFlow::Continue);
        }

        let lines: Vec<String> = scan.matches.iter().map(|m| m.describe()).collect();
        let mut text = format!(
            "📝 **Found {} hunted players in `{}`:**\n{}",
            scan.matches.len(),
            self.world,
            lines.join("\n")
        );
        if !added.is_empty() {
            text.push_str(&format!("\n➕ Now tracking: {}", added.join(", ")));
        }
        deliver(sink, &text).await;
        Ok(CycleFlow::Continue)
    }
}

impl PollJob for WorldWatcher {
    fn run_cycle<'a>(
        &'a mut self,
        ctx: &'a CycleContext,
    ) -> BoxFuture<'a, anyhow::Result<CycleFlow>> {
        self.cycle(ctx).boxed()
    }
}
