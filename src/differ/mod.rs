//! Snapshot differ for tracked characters.
//!
//! Compares a stored [`TrackedEntity`] against a fresh profile + character
//! payload and decides what, if anything, is worth telling the user:
//!
//! - combat or profession progress that rose by more than [`DEAD_BAND`]
//! - the player switching onto the tracked character (reported once until
//!   they are seen off it again)
//!
//! Levels only ever go up in game. A lower value from the API is logged as
//! an anomaly and the stored value is kept.

use crate::api::{CharacterData, PlayerProfile};
use crate::store::TrackedEntity;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Minimum progress delta that counts as a change.
pub const DEAD_BAND: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelChange {
    pub from: f64,
    pub to: f64,
}

/// Fresh API state for one tracked character. `character` is `None` when the
/// character payload could not be fetched; activity is still evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub profile: &'a PlayerProfile,
    pub character: Option<&'a CharacterData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    pub player: String,
    /// World while online.
    pub world: Option<String>,
    pub active: bool,
    pub became_active: bool,
    pub combat: Option<LevelChange>,
    pub professions: Vec<(String, LevelChange)>,
}

#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// The row to persist. Equal to the previous row unless levels rose.
    pub entity: TrackedEntity,
    /// Whether `entity` differs from the previous row.
    pub levels_changed: bool,
    pub summary: Option<ChangeSummary>,
}

/// Remembers which (player, character) pairs already got a "now active"
/// notification.
#[derive(Debug, Default)]
pub struct ActivityLedger {
    notified: HashSet<String>,
}

impl ActivityLedger {
    pub fn key(player: &str, character_id: &str) -> String {
        format!("{}_{}", player.to_lowercase(), character_id)
    }

    /// Record the current activity state. Returns true only on the
    /// transition into active.
    pub fn observe(&mut self, key: &str, is_active: bool) -> bool {
        if is_active {
            self.notified.insert(key.to_string())
        } else {
            self.notified.remove(key);
            false
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl ChangeSummary {
    pub fn has_level_changes(&self) -> bool {
        self.combat.is_some() || !self.professions.is_empty()
    }

    /// Multi-line chat text.
    pub fn render(&self) -> String {
        let mut blocks = Vec::new();

        if self.became_active {
            blocks.push(format!(
                "🎮 `{}` is now active on their tracked character in world `{}`!",
                self.player,
                self.world.as_deref().unwrap_or("Offline")
            ));
        }

        if self.has_level_changes() {
            let mut lines = vec![format!("🔄 `{}` updated stats:", self.player)];
            if let Some(c) = self.combat {
                lines.push(format!("• Combat: {:.2} → {:.2} ⬆️", c.from, c.to));
            }
            if !self.professions.is_empty() {
                lines.push("• Increased Professions:".to_string());
                for (name, c) in &self.professions {
                    lines.push(format!(
                        "  - {}: {:.2} → {:.2} ⬆️",
                        capitalize(name),
                        c.from,
                        c.to
                    ));
                }
            }
            if let Some(world) = &self.world {
                lines.push(format!("• 🌍 World: `{}` (Online)", world));
            }
            if self.active {
                lines.push("• 🎮 Character is currently active!".to_string());
            }
            blocks.push(lines.join("\n"));
        }

        blocks.join("\n\n")
    }
}

/// Applies the dead-band and monotonic rules to one value. Returns the
/// change when it should be reported.
fn compare_level(what: &str, player: &str, previous: f64, current: f64) -> Option<LevelChange> {
    let delta = current - previous;
    if delta > DEAD_BAND {
        return Some(LevelChange {
            from: previous,
            to: current,
        });
    }
    if delta < -DEAD_BAND {
        warn!(
            player = %player,
            what = %what,
            stored = previous,
            fetched = current,
            "level went down, keeping stored value"
        );
    }
    None
}

#[derive(Debug, Default)]
pub struct SnapshotDiffer {
    ledger: ActivityLedger,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diff(&mut self, previous: &TrackedEntity, obs: Observation<'_>) -> DiffOutcome {
        let player = previous.display_name.as_str();
        let active = obs.profile.is_active_on(&previous.character_id);
        let world = obs.profile.world().map(str::to_string);
        let became_active = self
            .ledger
            .observe(&ActivityLedger::key(player, &previous.character_id), active);

        let mut entity = previous.clone();
        let mut combat = None;
        let mut professions = Vec::new();

        if let Some(character) = obs.character {
            combat = compare_level("combat", player, previous.combat_level, character.combat_level());
            if let Some(c) = combat {
                entity.combat_level = c.to;
            }

            for (name, level) in character.profession_levels() {
                if let Some(c) = compare_level(&name, player, previous.profession(&name), level) {
                    entity.profession_levels.insert(name.clone(), c.to);
                    professions.push((name, c));
                }
            }

            if combat.is_some() || !professions.is_empty() {
                if let Some(class) = &character.class_type {
                    entity.class_tag = class.clone();
                }
            }
        } else {
            debug!(player = %player, "no character payload, levels unchanged");
        }

        let levels_changed = combat.is_some() || !professions.is_empty();
        let summary = (levels_changed || became_active).then(|| ChangeSummary {
            player: player.to_string(),
            world,
            active,
            became_active,
            combat,
            professions,
        });

        DiffOutcome {
            entity,
            levels_changed,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProfessionData;
    use std::collections::HashMap;

    fn stored() -> TrackedEntity {
        TrackedEntity::parse("Alice,MAGE,uuid-1,char-1,combat:50.45,mining:12.03,note").unwrap()
    }

    fn character(level: f64, xp: f64, mining: (f64, f64)) -> CharacterData {
        let mut professions = HashMap::new();
        professions.insert(
            "mining".to_string(),
            ProfessionData {
                level: mining.0,
                xp_percent: mining.1,
            },
        );
        CharacterData {
            class_type: Some("MAGE".into()),
            level,
            xp_percent: xp,
            professions,
            ..Default::default()
        }
    }

    fn profile(online: bool, active: &str) -> PlayerProfile {
        PlayerProfile {
            username: "Alice".into(),
            uuid: "uuid-1".into(),
            online,
            server: Some("EU3".into()),
            active_character: Some(active.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_change_is_silent_and_identical() {
        let mut differ = SnapshotDiffer::new();
        let prev = stored();
        let p = profile(false, "char-1");
        let c = character(50.0, 45.0, (12.0, 3.0));

        for _ in 0..2 {
            let out = differ.diff(&prev, Observation { profile: &p, character: Some(&c) });
            assert!(out.summary.is_none());
            assert!(!out.levels_changed);
            assert_eq!(out.entity.to_line(), prev.to_line());
        }
    }

    #[test]
    fn test_increase_reported_and_persisted() {
        let mut differ = SnapshotDiffer::new();
        let prev = stored();
        let p = profile(true, "other-char");
        let c = character(51.0, 2.0, (13.0, 0.0));

        let out = differ.diff(&prev, Observation { profile: &p, character: Some(&c) });
        assert!(out.levels_changed);
        let summary = out.summary.unwrap();
        assert_eq!(summary.combat, Some(LevelChange { from: 50.45, to: 51.02 }));
        assert_eq!(summary.professions.len(), 1);
        assert!(!summary.became_active);
        assert_eq!(
            out.entity.to_line(),
            "Alice,MAGE,uuid-1,char-1,combat:51.02,mining:13.00,note"
        );

        let text = summary.render();
        assert!(text.contains("• Combat: 50.45 → 51.02 ⬆️"));
        assert!(text.contains("  - Mining: 12.03 → 13.00 ⬆️"));
        assert!(text.contains("• 🌍 World: `EU3` (Online)"));
        assert!(!text.contains("currently active"));
    }

    #[test]
    fn test_tiny_delta_inside_dead_band() {
        let mut differ = SnapshotDiffer::new();
        let mut prev = stored();
        prev.combat_level = 50.445;
        let p = profile(false, "char-1");
        let c = character(50.0, 45.0, (12.0, 3.0));
        let out = differ.diff(&prev, Observation { profile: &p, character: Some(&c) });
        assert!(out.summary.is_none());
        assert_eq!(out.entity.combat_level, 50.445);
    }

    #[test]
    fn test_decrease_never_regresses() {
        let mut differ = SnapshotDiffer::new();
        let prev = stored();
        let p = profile(false, "char-1");
        let c = character(40.0, 0.0, (2.0, 0.0));

        let out = differ.diff(&prev, Observation { profile: &p, character: Some(&c) });
        assert!(out.summary.is_none());
        assert_eq!(out.entity.combat_level, 50.45);
        assert_eq!(out.entity.profession("mining"), 12.03);
    }

    #[test]
    fn test_new_profession_counts_from_zero() {
        let mut differ = SnapshotDiffer::new();
        let prev = stored();
        let p = profile(false, "char-1");
        let mut c = character(50.0, 45.0, (12.0, 3.0));
        c.professions.insert(
            "fishing".into(),
            ProfessionData { level: 2.0, xp_percent: 50.0 },
        );

        let out = differ.diff(&prev, Observation { profile: &p, character: Some(&c) });
        let summary = out.summary.unwrap();
        assert_eq!(summary.professions, vec![("fishing".to_string(), LevelChange { from: 0.0, to: 2.5 })]);
        assert_eq!(out.entity.profession("fishing"), 2.5);
    }

    #[test]
    fn test_activation_notified_once_per_session() {
        let mut differ = SnapshotDiffer::new();
        let prev = stored();
        let c = character(50.0, 45.0, (12.0, 3.0));
        let on = profile(true, "char-1");
        let off = profile(false, "char-1");

        let first = differ.diff(&prev, Observation { profile: &on, character: Some(&c) });
        let summary = first.summary.unwrap();
        assert!(summary.became_active);
        assert!(!first.levels_changed);
        assert_eq!(
            summary.render(),
            "🎮 `Alice` is now active on their tracked character in world `EU3`!"
        );

        let again = differ.diff(&prev, Observation { profile: &on, character: Some(&c) });
        assert!(again.summary.is_none());

        let gone = differ.diff(&prev, Observation { profile: &off, character: Some(&c) });
        assert!(gone.summary.is_none());

        let back = differ.diff(&prev, Observation { profile: &on, character: Some(&c) });
        assert!(back.summary.unwrap().became_active);
    }

    #[test]
    fn test_missing_character_passes_row_through() {
        let mut differ = SnapshotDiffer::new();
        let prev = stored();
        let p = profile(true, "char-1");
        let out = differ.diff(&prev, Observation { profile: &p, character: None });
        assert_eq!(out.entity, prev);
        assert!(!out.levels_changed);
        // Activity is still evaluated from the profile alone.
        assert!(out.summary.unwrap().became_active);
    }
}
