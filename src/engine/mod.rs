//! User-facing operations.
//!
//! [`Engine`] is what a chat front end calls into: tracker-file maintenance,
//! starting and stopping the keyed poll loops, and the one-shot scans. It
//! owns the [`PollManager`]; nothing here is global.

pub mod scan;
pub mod table;

pub use scan::{LeaderboardSync, SweepReport};

use crate::api::{ApiError, GameApi};
use crate::config::TrackerConfig;
use crate::hunted::LevelWindow;
use crate::jobs::{
    compare_key, world_key, PlayerFinder, StatComparer, WorldWatcher, COMPARE_KEY_PREFIX,
    PLAYER_TRACKER_KEY, WORLD_KEY_PREFIX,
};
use crate::notify::Notifier;
use crate::poll::{ActiveLoop, LoopExit, PollError, PollManager};
use crate::store::{StoreError, TrackedEntity, TrackedPlayer, TrackerFile};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("interval must be at least {min}s, got {got}s")]
    IntervalTooShort { min: u64, got: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added(TrackedPlayer),
    AlreadyTracked,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddCharacterOutcome {
    Added(TrackedEntity),
    AlreadyTracked,
    PlayerNotFound,
    CharacterNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

pub struct Engine {
    api: Arc<dyn GameApi>,
    tracker: TrackerFile,
    advanced: TrackerFile,
    polls: PollManager,
    settings: TrackerConfig,
}

/// Lookup failures that mean "no such player" rather than a broken call.
fn is_not_found(e: &ApiError) -> bool {
    matches!(e, ApiError::NoData(_) | ApiError::MissingIdentity(_))
}

impl Engine {
    pub fn new(api: Arc<dyn GameApi>, settings: TrackerConfig) -> Self {
        Self {
            api,
            tracker: TrackerFile::new(&settings.tracker_file),
            advanced: TrackerFile::new(&settings.advanced_tracker_file),
            polls: PollManager::new(),
            settings,
        }
    }

    pub fn polls(&self) -> &PollManager {
        &self.polls
    }

    pub fn tracker(&self) -> &TrackerFile {
        &self.tracker
    }

    pub fn advanced(&self) -> &TrackerFile {
        &self.advanced
    }

    pub fn window(&self) -> LevelWindow {
        LevelWindow::new(self.settings.target_level, self.settings.level_range)
    }

    pub async fn ensure_stores(&self) -> Result<(), StoreError> {
        self.tracker.ensure_exists().await?;
        self.advanced.ensure_exists().await
    }

    // ---- simple tracker ----

    pub async fn add(&self, name: &str) -> Result<AddOutcome, EngineError> {
        if self.tracker.contains(name).await? {
            return Ok(AddOutcome::AlreadyTracked);
        }
        let profile = match self.api.player(name).await {
            Ok(p) => p,
            Err(e) if is_not_found(&e) => return Ok(AddOutcome::NotFound),
            Err(e) => return Err(e.into()),
        };
        let player = TrackedPlayer {
            name: if profile.username.is_empty() {
                name.to_string()
            } else {
                profile.username
            },
            uuid: profile.uuid,
        };
        self.tracker.append(&player.to_line()).await?;
        info!(player = %player.name, "player tracked");
        Ok(AddOutcome::Added(player))
    }

    pub async fn remove(&self, name: &str) -> Result<RemoveOutcome, EngineError> {
        Ok(if self.tracker.remove_by_key(name).await? {
            info!(player = %name, "player untracked");
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotFound
        })
    }

    pub async fn list(&self) -> Result<Vec<TrackedPlayer>, EngineError> {
        Ok(self.tracker.players().await?)
    }

    // ---- extended tracker ----

    /// Track one character with its current levels as the baseline.
    pub async fn add_character(
        &self,
        name: &str,
        character_id: &str,
    ) -> Result<AddCharacterOutcome, EngineError> {
        if self.advanced.contains(name).await? {
            return Ok(AddCharacterOutcome::AlreadyTracked);
        }
        let profile = match self.api.player(name).await {
            Ok(p) => p,
            Err(e) if is_not_found(&e) => return Ok(AddCharacterOutcome::PlayerNotFound),
            Err(e) => return Err(e.into()),
        };
        let character = match self.api.character(name, character_id).await {
            Ok(c) => c,
            Err(e) if is_not_found(&e) => match profile.characters.get(character_id) {
                Some(c) => c.clone(),
                None => return Ok(AddCharacterOutcome::CharacterNotFound),
            },
            Err(e) => return Err(e.into()),
        };

        let entity = TrackedEntity {
            display_name: if profile.username.is_empty() {
                name.to_string()
            } else {
                profile.username.clone()
            },
            class_tag: character.class_name().to_string(),
            entity_id: profile.uuid.clone(),
            character_id: character_id.to_string(),
            combat_level: character.combat_level(),
            profession_levels: character.profession_levels(),
            extra_fields: Vec::new(),
        };
        self.advanced.append(&entity.to_line()).await?;
        info!(player = %entity.display_name, character = %character_id, "character tracked");
        Ok(AddCharacterOutcome::Added(entity))
    }

    pub async fn remove_character(&self, name: &str) -> Result<RemoveOutcome, EngineError> {
        Ok(if self.advanced.remove_by_key(name).await? {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotFound
        })
    }

    /// Paginated table of tracked characters. Unreadable rows are left out.
    pub async fn list_characters(&self) -> Result<Vec<String>, EngineError> {
        let entities: Vec<TrackedEntity> = self
            .advanced
            .list_all()
            .await?
            .iter()
            .filter_map(|l| TrackedEntity::parse(l))
            .collect();
        Ok(table::render_pages(&entities))
    }

    // ---- poll loops ----

    pub fn start_player_tracker(
        &self,
        interval: Option<Duration>,
        sink: Arc<dyn Notifier>,
    ) -> Result<JoinHandle<LoopExit>, EngineError> {
        let job = PlayerFinder::new(self.api.clone(), self.tracker.clone());
        Ok(self.polls.start(PLAYER_TRACKER_KEY, interval, job, sink)?)
    }

    pub fn start_world(
        &self,
        world: &str,
        interval: Option<Duration>,
        sink: Arc<dyn Notifier>,
    ) -> Result<JoinHandle<LoopExit>, EngineError> {
        let job = WorldWatcher::new(self.api.clone(), self.tracker.clone(), world, self.window());
        Ok(self.polls.start(&world_key(world), interval, job, sink)?)
    }

    pub fn start_compare(
        &self,
        guild: &str,
        channel: &str,
        interval: Option<Duration>,
        sink: Arc<dyn Notifier>,
    ) -> Result<JoinHandle<LoopExit>, EngineError> {
        if let Some(every) = interval {
            let min = self.settings.min_compare_interval_secs;
            if every.as_secs() < min {
                return Err(EngineError::IntervalTooShort {
                    min,
                    got: every.as_secs(),
                });
            }
        }
        let job = StatComparer::new(self.api.clone(), self.advanced.clone());
        Ok(self.polls.start(&compare_key(guild, channel), interval, job, sink)?)
    }

    pub fn stop(&self, key: &str) -> Result<(), EngineError> {
        Ok(self.polls.stop(key)?)
    }

    pub fn stop_all(&self) -> usize {
        self.polls.stop_all()
    }

    pub fn list_active(&self) -> Vec<ActiveLoop> {
        self.polls.list_active()
    }

    /// Active loops grouped by kind, as chat text.
    pub fn active_summary(&self) -> String {
        let active = self.list_active();
        let describe = |l: &ActiveLoop| {
            let since = l.started_at.format("%H:%M:%S UTC");
            let mut text = match l.interval {
                Some(every) => format!("every {}s since {}", every.as_secs(), since),
                None => format!("one-shot since {}", since),
            };
            if l.stopping {
                text.push_str(" (stopping)");
            }
            text
        };

        let mut lines = vec!["📋 **Active loops**".to_string()];
        match active.iter().find(|l| l.key == PLAYER_TRACKER_KEY) {
            Some(l) => lines.push(format!("• Player tracker: running {}", describe(l))),
            None => lines.push("• Player tracker: not running".to_string()),
        }

        for (title, prefix) in [("World trackers", WORLD_KEY_PREFIX), ("Stat comparers", COMPARE_KEY_PREFIX)] {
            let group: Vec<&ActiveLoop> = active.iter().filter(|l| l.key.starts_with(prefix)).collect();
            if group.is_empty() {
                lines.push(format!("• {}: none", title));
                continue;
            }
            lines.push(format!("• {}:", title));
            for l in group {
                lines.push(format!("  - `{}` {}", &l.key[prefix.len()..], describe(l)));
            }
        }
        lines.join("\n")
    }

    // ---- one-shot scans ----

    pub async fn sync_leaderboard(&self) -> Result<LeaderboardSync, EngineError> {
        scan::sync_leaderboard(self.api.as_ref(), &self.tracker, self.window()).await
    }

    pub async fn scan_hunted(&self, sink: &dyn Notifier) -> Result<SweepReport, EngineError> {
        let worlds = scan::sweep_worlds(&self.settings.server_regions, self.settings.servers_per_region);
        Ok(scan::sweep(self.api.as_ref(), &self.tracker, &worlds, self.window(), sink).await?)
    }
}
