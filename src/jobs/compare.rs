//! Stat comparer: runs the snapshot differ over every row of the extended
//! tracker file and rewrites the file once per cycle.
//!
//! A cycle always processes the whole file and always finishes its rewrite;
//! cancellation is only observed between cycles.

use crate::api::GameApi;
use crate::differ::{DiffOutcome, Observation, SnapshotDiffer};
use crate::notify::deliver;
use crate::poll::{CycleContext, CycleFlow, PollJob};
use crate::store::{TrackedEntity, TrackerFile};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct StatComparer {
    api: Arc<dyn GameApi>,
    store: TrackerFile,
    differ: SnapshotDiffer,
}

impl StatComparer {
    pub fn new(api: Arc<dyn GameApi>, store: TrackerFile) -> Self {
        Self {
            api,
            store,
            differ: SnapshotDiffer::new(),
        }
    }

    /// Fetch and diff one row. `None` when the player could not be fetched.
    async fn refresh(&mut self, previous: &TrackedEntity) -> Option<DiffOutcome> {
        let name = previous.display_name.as_str();
        let profile = match self.api.player(name).await {
            Ok(p) => p,
            Err(e) => {
                warn!(player = %name, error = %e, "profile fetch failed, row unchanged");
                return None;
            }
        };

        let character = match self.api.character(name, &previous.character_id).await {
            Ok(c) => Some(c),
            Err(e) => {
                debug!(
                    player = %name,
                    character = %previous.character_id,
                    error = %e,
                    "character fetch failed, using profile copy"
                );
                profile.characters.get(&previous.character_id).cloned()
            }
        };

        Some(self.differ.diff(
            previous,
            Observation {
                profile: &profile,
                character: character.as_ref(),
            },
        ))
    }

    async fn cycle(&mut self, ctx: &CycleContext) -> anyhow::Result<CycleFlow> {
        let rows = self.store.list_all().await?;
        let mut rewritten = Vec::with_capacity(rows.len());
        let mut summaries = Vec::new();
        let mut changed = 0usize;
        let mut skipped = 0usize;

        for line in rows {
            let Some(previous) = TrackedEntity::parse(&line) else {
                debug!(row = %line, "not an extended row, passing through");
                rewritten.push(line);
                continue;
            };

            match self.refresh(&previous).await {
                Some(outcome) => {
                    if outcome.levels_changed {
                        changed += 1;
                        rewritten.push(outcome.entity.to_line());
                    } else {
                        rewritten.push(line);
                    }
                    if let Some(summary) = outcome.summary {
                        summaries.push(summary.render());
                    }
                }
                None => {
                    skipped += 1;
                    rewritten.push(line);
                }
            }
            tokio::task::yield_now().await;
        }

        self.store.replace_all(&rewritten).await?;
        info!(
            key = %ctx.key,
            rows = rewritten.len(),
            changed = changed,
            skipped = skipped,
            "compare cycle done"
        );

        if !summaries.is_empty() {
            deliver(ctx.notifier.as_ref(), &summaries.join("\n\n")).await;
        }
        Ok(CycleFlow::Continue)
    }
}

impl PollJob for StatComparer {
    fn run_cycle<'a>(
        &'a mut self,
        ctx: &'a CycleContext,
    ) -> BoxFuture<'a, anyhow::Result<CycleFlow>> {
        self.cycle(ctx).boxed()
    }
}
