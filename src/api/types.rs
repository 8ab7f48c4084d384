//! Game API payloads (the subset of fields the trackers read).
//!
//! The API is loose about nulls (`deaths: null`, `gamemode: null`), so most
//! fields go through [`null_default`] instead of plain `#[serde(default)]`.

use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};

/// Gamemode tag marking a hunted character.
pub const HUNTED: &str = "hunted";

/// Quest whose completion unlocks hunted mode toggling.
pub const HUNTERS_CALLING: &str = "A Hunter's Calling";

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `GET /player/{identifier}?fullResult`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    #[serde(default, deserialize_with = "null_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_default")]
    pub uuid: String,
    #[serde(default, deserialize_with = "null_default")]
    pub online: bool,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub active_character: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub characters: HashMap<String, CharacterData>,
}

impl PlayerProfile {
    /// The character the player is currently playing, if any.
    pub fn active(&self) -> Option<(&str, &CharacterData)> {
        let id = self.active_character.as_deref()?;
        self.characters.get(id).map(|c| (id, c))
    }

    /// World name while online, `None` otherwise.
    pub fn world(&self) -> Option<&str> {
        if self.online {
            self.server.as_deref()
        } else {
            None
        }
    }

    /// Online and currently playing `character_id`.
    pub fn is_active_on(&self, character_id: &str) -> bool {
        self.online && self.active_character.as_deref() == Some(character_id)
    }
}

/// One character, either nested in a profile or from
/// `GET /player/{name}/characters/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterData {
    #[serde(default, rename = "type")]
    pub class_type: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub level: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub xp_percent: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub gamemode: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub deaths: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub professions: HashMap<String, ProfessionData>,
    #[serde(default, deserialize_with = "null_default")]
    pub quests: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfessionData {
    #[serde(default, deserialize_with = "null_default")]
    pub level: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub xp_percent: f64,
}

/// `floor(level) + xpPercent / 100`: a continuous progress value.
pub fn progress_level(level: f64, xp_percent: f64) -> f64 {
    level.floor() + xp_percent * 0.01
}

impl CharacterData {
    pub fn class_name(&self) -> &str {
        self.class_type.as_deref().unwrap_or("Unknown")
    }

    pub fn combat_level(&self) -> f64 {
        progress_level(self.level, self.xp_percent)
    }

    /// Progress level per profession, sorted by name.
    pub fn profession_levels(&self) -> BTreeMap<String, f64> {
        self.professions
            .iter()
            .map(|(name, p)| (name.clone(), progress_level(p.level, p.xp_percent)))
            .collect()
    }

    pub fn has_gamemode(&self, tag: &str) -> bool {
        self.gamemode.iter().any(|g| g == tag)
    }

    pub fn has_quest(&self, quest: &str) -> bool {
        self.quests.iter().any(|q| q == quest)
    }
}

/// One row of `GET /leaderboards/hichContent`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub uuid: String,
    #[serde(default, deserialize_with = "null_default")]
    pub character_type: String,
    #[serde(default, deserialize_with = "null_default")]
    pub character_data: LeaderboardCharacter,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderboardCharacter {
    #[serde(default, deserialize_with = "null_default")]
    pub level: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub deaths: i64,
}
