//! Player finder: watches the simple tracker file for players who are online
//! on a hunted character.
//!
//! Interval runs announce a player once per online session, not on every
//! cycle they stay online; one-shot runs always announce.

use crate::api::GameApi;
use crate::differ::ActivityLedger;
use crate::hunted::online_hunted;
use crate::notify::deliver;
use crate::poll::{CycleContext, CycleFlow, PollJob};
use crate::store::TrackerFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PlayerFinder {
    api: Arc<dyn GameApi>,
    tracker: TrackerFile,
    /// Players already announced; a player is announced again only after
    /// being seen off their hunted character.
    announced: ActivityLedger,
}

impl PlayerFinder {
    pub fn new(api: Arc<dyn GameApi>, tracker: TrackerFile) -> Self {
        Self {
            api,
            tracker,
            announced: ActivityLedger::default(),
        }
    }

    async fn cycle(&mut self, ctx: &CycleContext) -> anyhow::Result<CycleFlow> {
        let players = self.tracker.players().await?;
        let mut online = 0usize;

        for tracked in &players {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let identifier = if tracked.uuid.is_empty() {
                &tracked.name
            } else {
                &tracked.uuid
            };

            let profile = match self.api.player(identifier).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(player = %tracked.name, error = %e, "player lookup failed");
                    continue;
                }
            };
            if !profile.username.eq_ignore_ascii_case(&tracked.name) {
                debug!(
                    tracked = %tracked.name,
                    api = %profile.username,
                    "username does not match tracked name"
                );
                continue;
            }

            let key = ActivityLedger::key(&tracked.name, "hunted");
            let hunted = online_hunted(&profile);
            let first_sighting = self.announced.observe(&key, hunted.is_some());
            if let Some((class, level)) = hunted {
                online += 1;
                if first_sighting || ctx.one_shot {
                    deliver(
                        ctx.notifier.as_ref(),
                        &format!(
                            "🧭 `{}` is online in `{}` on a Hunted **{}**, level **{}**!",
                            tracked.name,
                            profile.server.as_deref().unwrap_or("unknown"),
                            class,
                            level
                        ),
                    )
                    .await;
                }
            }
            tokio::task::yield_now().await;
        }

        info!(tracked = players.len(), online = online, "player tracker cycle done");
        if online == 0 && ctx.one_shot {
            deliver(ctx.notifier.as_ref(), "⛔ No hunted players are currently online.").await;
        }
        Ok(CycleFlow::Continue)
    }
}

impl PollJob for PlayerFinder {
    fn run_cycle<'a>(
        &'a mut self,
        ctx: &'a CycleContext,
    ) -> BoxFuture<'a, anyhow::Result<CycleFlow>> {
        self.cycle(ctx).boxed()
    }
}
