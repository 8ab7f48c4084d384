//! The poll jobs, plus the world-scan helpers they share with the
//! one-shot sweeps in [`engine`](crate::engine).
//!
//! | key                        | job               |
//! |----------------------------|-------------------|
//! | `player-tracker`           | [`PlayerFinder`]  |
//! | `world:{world}`            | [`WorldWatcher`]  |
//! | `compare:{guild}_{channel}`| [`StatComparer`]  |

pub mod compare;
pub mod tracker;
pub mod world;

pub use compare::StatComparer;
pub use tracker::PlayerFinder;
pub use world::WorldWatcher;

use crate::api::{ApiError, GameApi};
use crate::hunted::{assess, HuntedMatch, LevelWindow};
use crate::poll::CancelToken;
use crate::store::{StoreError, TrackedPlayer, TrackerFile};
use std::collections::HashSet;
use tracing::{debug, info};

pub const PLAYER_TRACKER_KEY: &str = "player-tracker";
pub const WORLD_KEY_PREFIX: &str = "world:";
pub const COMPARE_KEY_PREFIX: &str = "compare:";

pub fn world_key(world: &str) -> String {
    format!("{}{}", WORLD_KEY_PREFIX, world)
}

pub fn compare_key(guild: &str, channel: &str) -> String {
    format!("{}{}_{}", COMPARE_KEY_PREFIX, guild, channel)
}

/// Result of assessing every online player of one world.
#[derive(Debug, Clone, Default)]
pub struct WorldScan {
    pub checked: usize,
    pub failed: usize,
    pub matches: Vec<HuntedMatch>,
}

/// Fetch the players online in `world` and keep the hunted ones inside
/// `window`. Per-player failures are counted and skipped. Stops early, with
/// what it has so far, once `cancel` fires.
pub async fn scan_world(
    api: &dyn GameApi,
    world: &str,
    window: LevelWindow,
    cancel: Option<&CancelToken>,
) -> Result<WorldScan, ApiError> {
    let uuids = api.world_players(world).await?;
    let mut scan = WorldScan::default();

    for uuid in &uuids {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            debug!(world = %world, checked = scan.checked, "world scan cancelled");
            break;
        }
        scan.checked += 1;
        match api.player(uuid).await {
            Ok(profile) => {
                if let Some(m) = assess(&profile, window) {
                    scan.matches.push(m);
                }
            }
            Err(e) => {
                scan.failed += 1;
                debug!(world = %world, uuid = %uuid, error = %e, "player lookup failed");
            }
        }
        tokio::task::yield_now().await;
    }
    Ok(scan)
}

/// Append HICH matches that are not tracked yet. Returns the names added.
pub async fn track_new_hich(
    tracker: &TrackerFile,
    matches: &[HuntedMatch],
) -> Result<Vec<String>, StoreError> {
    let candidates: Vec<(&str, &str)> = matches
        .iter()
        .filter(|m| m.is_hich)
        .map(|m| (m.player_name.as_str(), m.player_uuid.as_str()))
        .collect();
    track_new_players(tracker, &candidates).await
}

/// Append `(name, uuid)` pairs whose name is not tracked yet.
pub async fn track_new_players(
    tracker: &TrackerFile,
    candidates: &[(&str, &str)],
) -> Result<Vec<String>, StoreError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let mut known: HashSet<String> = tracker.keys().await?.into_iter().collect();
    let mut names = Vec::new();
    let mut rows = Vec::new();
    for (name, uuid) in candidates {
        if known.insert(name.to_lowercase()) {
            names.push(name.to_string());
            rows.push(
                TrackedPlayer {
                    name: name.to_string(),
                    uuid: uuid.to_string(),
                }
                .to_line(),
            );
        }
    }
    tracker.append_many(&rows).await?;
    if !names.is_empty() {
        info!(added = ?names, "auto-tracked players");
    }
    Ok(names)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::api::{CharacterData, PlayerProfile};
    use crate::notify::{ChannelNotifier, Notification, Notifier};
    use crate::poll::{cancel_pair, CancelSource, CycleContext};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    pub fn context(
        one_shot: bool,
    ) -> (CycleContext, CancelSource, UnboundedReceiver<Notification>) {
        let (sink, rx) = ChannelNotifier::new();
        let (source, cancel) = cancel_pair();
        let notifier: Arc<dyn Notifier> = Arc::new(sink);
        let ctx = CycleContext {
            key: "test".into(),
            cycle: 1,
            one_shot,
            cancel,
            notifier,
        };
        (ctx, source, rx)
    }

    pub fn modes(m: &[&str]) -> Vec<String> {
        m.iter().map(|s| s.to_string()).collect()
    }

    /// A profile whose active character `c1` is `character`.
    pub fn playing(name: &str, uuid: &str, server: &str, character: CharacterData) -> PlayerProfile {
        let mut characters = HashMap::new();
        characters.insert("c1".to_string(), character);
        PlayerProfile {
            username: name.into(),
            uuid: uuid.into(),
            online: true,
            server: Some(server.into()),
            active_character: Some("c1".into()),
            characters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::api::testing::FakeApi;
    use crate::api::CharacterData;
    use crate::hunted::HICH_MODES;

    #[test]
    fn test_keys() {
        assert_eq!(world_key("EU1"), "world:EU1");
        assert_eq!(compare_key("123", "456"), "compare:123_456");
    }

    #[tokio::test]
    async fn test_scan_world_skips_failures() {
        let api = FakeApi::new();
        api.put_world("EU1", vec!["u1".into(), "u2".into(), "u3".into()]);
        api.put_player(playing(
            "Hunter",
            "u1",
            "EU1",
            CharacterData {
                level: 25.0,
                gamemode: modes(&HICH_MODES),
                ..Default::default()
            },
        ));
        api.put_player(playing("Casual", "u3", "EU1", CharacterData { level: 25.0, ..Default::default() }));

        let scan = scan_world(&api, "EU1", LevelWindow::new(26, 10), None).await.unwrap();
        assert_eq!(scan.checked, 3);
        assert_eq!(scan.failed, 1);
        assert_eq!(scan.matches.len(), 1);
        assert_eq!(scan.matches[0].player_name, "Hunter");

        assert!(matches!(
            scan_world(&api, "XX9", LevelWindow::new(26, 10), None).await,
            Err(ApiError::NoData(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_scan_looks_up_no_players() {
        let api = FakeApi::new();
        api.put_world("EU1", vec!["u1".into(), "u2".into()]);
        let (source, token) = crate::poll::cancel_pair();
        source.cancel();

        let scan = scan_world(&api, "EU1", LevelWindow::new(26, 10), Some(&token)).await.unwrap();
        assert_eq!(scan.checked, 0);
        assert!(scan.matches.is_empty());
        assert_eq!(api.calls(), vec!["world:EU1"]);
    }

    #[tokio::test]
    async fn test_track_new_players_dedups_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = TrackerFile::new(dir.path().join("tracker.txt"));
        tracker.append("Alice,u1").await.unwrap();

        let added = track_new_players(&tracker, &[("ALICE", "u1"), ("Bob", "u2"), ("bob", "u2")])
            .await
            .unwrap();
        assert_eq!(added, vec!["Bob"]);
        assert_eq!(tracker.list_all().await.unwrap(), vec!["Alice,u1", "Bob,u2"]);
    }
}
