//! Hunted / HICH character classification.

use crate::api::types::{HUNTED, HUNTERS_CALLING};
use crate::api::{CharacterData, PlayerProfile};

/// Gamemodes a character must carry, with zero deaths, to count as HICH.
pub const HICH_MODES: [&str; 4] = ["craftsman", "hunted", "hardcore", "ironman"];

/// `target ± range`, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelWindow {
    pub target: u32,
    pub range: u32,
}

impl LevelWindow {
    pub fn new(target: u32, range: u32) -> Self {
        Self { target, range }
    }

    pub fn contains(&self, level: f64) -> bool {
        (level - f64::from(self.target)).abs() <= f64::from(self.range)
    }
}

impl std::fmt::Display for LevelWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}±{}", self.target, self.range)
    }
}

/// Deaths are read from the character itself, not the player total.
pub fn is_hich(character: &CharacterData) -> bool {
    character.deaths == 0 && HICH_MODES.iter().all(|m| character.has_gamemode(m))
}

/// A player whose active character is hunted (or can toggle hunted) and
/// sits inside the level window.
#[derive(Debug, Clone, PartialEq)]
pub struct HuntedMatch {
    pub player_name: String,
    pub player_uuid: String,
    pub character_id: String,
    pub character_type: String,
    pub level: f64,
    pub is_hich: bool,
    pub deaths: i64,
    /// Completed "A Hunter's Calling", so hunted mode can be toggled.
    pub can_toggle_hunted: bool,
}

impl HuntedMatch {
    pub fn describe(&self) -> String {
        format!(
            "`{}`{} - Class: `{}`, Level: `{}`",
            self.player_name,
            if self.is_hich { " [HICH]" } else { "" },
            self.character_type,
            self.level
        )
    }
}

pub fn assess(profile: &PlayerProfile, window: LevelWindow) -> Option<HuntedMatch> {
    let (character_id, character) = profile.active()?;

    let hunted = character.has_gamemode(HUNTED);
    let can_toggle_hunted = character.has_quest(HUNTERS_CALLING);
    if !(hunted || can_toggle_hunted) || !window.contains(character.level) {
        return None;
    }

    Some(HuntedMatch {
        player_name: if profile.username.is_empty() {
            "Unknown".to_string()
        } else {
            profile.username.clone()
        },
        player_uuid: profile.uuid.clone(),
        character_id: character_id.to_string(),
        character_type: character.class_name().to_string(),
        level: character.level,
        is_hich: is_hich(character),
        deaths: character.deaths,
        can_toggle_hunted,
    })
}

/// Class and level of the active character when the player is online and
/// playing it in hunted mode.
pub fn online_hunted(profile: &PlayerProfile) -> Option<(&str, f64)> {
    if !profile.online {
        return None;
    }
    let (_, character) = profile.active()?;
    character
        .has_gamemode(HUNTED)
        .then(|| (character.class_name(), character.level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn profile_with(character: CharacterData) -> PlayerProfile {
        let mut characters = HashMap::new();
        characters.insert("c1".to_string(), character);
        PlayerProfile {
            username: "Hunter".into(),
            uuid: "u-h".into(),
            online: true,
            server: Some("NA2".into()),
            active_character: Some("c1".into()),
            characters,
        }
    }

    fn modes(m: &[&str]) -> Vec<String> {
        m.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_level_window() {
        let w = LevelWindow::new(26, 10);
        assert!(w.contains(16.0));
        assert!(w.contains(36.0));
        assert!(!w.contains(37.0));
        assert_eq!(w.to_string(), "26±10");
    }

    #[test]
    fn test_hich_requires_all_modes_and_no_deaths() {
        let mut c = CharacterData {
            gamemode: modes(&HICH_MODES),
            ..Default::default()
        };
        assert!(is_hich(&c));
        c.deaths = 1;
        assert!(!is_hich(&c));
        c.deaths = 0;
        c.gamemode.pop();
        assert!(!is_hich(&c));
    }

    #[test]
    fn test_assess_hunted_in_range() {
        let p = profile_with(CharacterData {
            class_type: Some("ASSASSIN".into()),
            level: 30.0,
            gamemode: modes(&HICH_MODES),
            ..Default::default()
        });
        let m = assess(&p, LevelWindow::new(26, 10)).unwrap();
        assert!(m.is_hich);
        assert_eq!(m.describe(), "`Hunter` [HICH] - Class: `ASSASSIN`, Level: `30`");
        assert!(assess(&p, LevelWindow::new(80, 5)).is_none());
    }

    #[test]
    fn test_assess_quest_only() {
        let p = profile_with(CharacterData {
            level: 20.0,
            quests: vec![HUNTERS_CALLING.to_string()],
            ..Default::default()
        });
        let m = assess(&p, LevelWindow::new(26, 10)).unwrap();
        assert!(m.can_toggle_hunted);
        assert!(!m.is_hich);
        assert_eq!(m.character_type, "Unknown");
    }

    #[test]
    fn test_not_hunted_is_ignored() {
        let p = profile_with(CharacterData {
            level: 26.0,
            gamemode: modes(&["hardcore"]),
            ..Default::default()
        });
        assert!(assess(&p, LevelWindow::new(26, 10)).is_none());
        assert!(online_hunted(&p).is_none());
    }

    #[test]
    fn test_online_hunted() {
        let mut p = profile_with(CharacterData {
            class_type: Some("WARRIOR".into()),
            level: 44.0,
            gamemode: modes(&["hunted"]),
            ..Default::default()
        });
        assert_eq!(online_hunted(&p), Some(("WARRIOR", 44.0)));
        p.online = false;
        assert!(online_hunted(&p).is_none());
    }
}
