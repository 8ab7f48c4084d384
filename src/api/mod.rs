//! Typed access to the game REST API.
//!
//! [`GameApi`] is the seam the poll jobs fetch through. [`WynnApi`] is the
//! production implementation on top of the rate-limited [`HttpFetcher`];
//! tests substitute an in-memory fake.

pub mod types;

use crate::fetch::{is_empty_payload, HttpFetcher};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use types::{CharacterData, LeaderboardEntry, PlayerProfile, ProfessionData};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("no data for {0}")]
    NoData(String),
    #[error("payload for {0} has no identity field")]
    MissingIdentity(String),
    #[error("malformed payload for {what}: {source}")]
    Malformed {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait GameApi: Send + Sync {
    /// Full profile by player name or uuid.
    fn player<'a>(&'a self, identifier: &'a str)
        -> BoxFuture<'a, Result<PlayerProfile, ApiError>>;

    /// A single character of `player`.
    fn character<'a>(
        &'a self,
        player: &'a str,
        character_id: &'a str,
    ) -> BoxFuture<'a, Result<CharacterData, ApiError>>;

    /// Uuids of the players currently online in `world`.
    fn world_players<'a>(&'a self, world: &'a str) -> BoxFuture<'a, Result<Vec<String>, ApiError>>;

    /// The HICH leaderboard, in rank order.
    fn hich_leaderboard(&self) -> BoxFuture<'_, Result<Vec<LeaderboardEntry>, ApiError>>;
}

/// URL layout of the v3 API.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn player(&self, identifier: &str) -> String {
        format!("{}/player/{}?fullResult", self.base_url, identifier)
    }

    pub fn character(&self, player: &str, character_id: &str) -> String {
        format!("{}/player/{}/characters/{}", self.base_url, player, character_id)
    }

    pub fn world(&self, world: &str) -> String {
        format!("{}/player?identifier=uuid&server={}", self.base_url, world)
    }

    pub fn hich_leaderboard(&self) -> String {
        format!("{}/leaderboards/hichContent", self.base_url)
    }
}

/// [`GameApi`] over HTTP.
#[derive(Clone)]
pub struct WynnApi {
    fetcher: HttpFetcher,
    endpoints: Endpoints,
}

impl WynnApi {
    pub fn new(fetcher: HttpFetcher, base_url: &str) -> Self {
        Self {
            fetcher,
            endpoints: Endpoints::new(base_url),
        }
    }

    async fn get(&self, what: &str, url: String) -> Result<Value, ApiError> {
        let value = self.fetcher.fetch_json(&url).await;
        if is_empty_payload(&value) {
            return Err(ApiError::NoData(what.to_string()));
        }
        Ok(value)
    }
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|source| ApiError::Malformed {
        what: what.to_string(),
        source,
    })
}

/// World listings come back either as a list of uuids or as an object
/// keyed by uuid.
fn parse_world_players(value: &Value) -> Vec<String> {
    match value.get("players") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Leaderboards are objects keyed by rank ("1", "2", ...).
fn parse_leaderboard(value: Value) -> Result<Vec<LeaderboardEntry>, ApiError> {
    let Value::Object(map) = value else {
        return Ok(Vec::new());
    };
    let mut ranked: Vec<(u64, LeaderboardEntry)> = Vec::with_capacity(map.len());
    for (rank, entry) in map {
        let entry: LeaderboardEntry = decode("leaderboard entry", entry)?;
        ranked.push((rank.parse().unwrap_or(u64::MAX), entry));
    }
    ranked.sort_by_key(|(rank, _)| *rank);
    Ok(ranked.into_iter().map(|(_, e)| e).collect())
}

impl GameApi for WynnApi {
    fn player<'a>(
        &'a self,
        identifier: &'a str,
    ) -> BoxFuture<'a, Result<PlayerProfile, ApiError>> {
        async move {
            let value = self.get(identifier, self.endpoints.player(identifier)).await?;
            let profile: PlayerProfile = decode(identifier, value)?;
            if profile.uuid.is_empty() {
                return Err(ApiError::MissingIdentity(identifier.to_string()));
            }
            Ok(profile)
        }
        .boxed()
    }

    fn character<'a>(
        &'a self,
        player: &'a str,
        character_id: &'a str,
    ) -> BoxFuture<'a, Result<CharacterData, ApiError>> {
        async move {
            let what = format!("{}/{}", player, character_id);
            let value = self
                .get(&what, self.endpoints.character(player, character_id))
                .await?;
            let character: CharacterData = decode(&what, value)?;
            if character.class_type.is_none() {
                debug!(character = %what, "character payload has no type");
                return Err(ApiError::NoData(what));
            }
            Ok(character)
        }
        .boxed()
    }

    fn world_players<'a>(&'a self, world: &'a str) -> BoxFuture<'a, Result<Vec<String>, ApiError>> {
        async move {
            let value = self.get(world, self.endpoints.world(world)).await?;
            if value.get("players").is_none() {
                return Err(ApiError::NoData(world.to_string()));
            }
            Ok(parse_world_players(&value))
        }
        .boxed()
    }

    fn hich_leaderboard(&self) -> BoxFuture<'_, Result<Vec<LeaderboardEntry>, ApiError>> {
        async move {
            let value = self
                .get("hich leaderboard", self.endpoints.hich_leaderboard())
                .await?;
            parse_leaderboard(value)
        }
        .boxed()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`GameApi`] for job and engine tests.

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeApi {
        players: Mutex<HashMap<String, PlayerProfile>>,
        characters: Mutex<HashMap<String, CharacterData>>,
        worlds: Mutex<HashMap<String, Vec<String>>>,
        leaderboard: Mutex<Vec<LeaderboardEntry>>,
        failing: Mutex<HashSet<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a profile under both its username and its uuid
        /// (lowercased; lookups are case-insensitive like the real API).
        pub fn put_player(&self, profile: PlayerProfile) {
            let mut players = self.players.lock().unwrap();
            players.insert(profile.uuid.to_lowercase(), profile.clone());
            players.insert(profile.username.to_lowercase(), profile);
        }

        pub fn put_character(&self, player: &str, character_id: &str, data: CharacterData) {
            self.characters
                .lock()
                .unwrap()
                .insert(format!("{}/{}", player.to_lowercase(), character_id), data);
        }

        pub fn put_world(&self, world: &str, uuids: Vec<String>) {
            self.worlds.lock().unwrap().insert(world.to_string(), uuids);
        }

        pub fn put_leaderboard(&self, entries: Vec<LeaderboardEntry>) {
            *self.leaderboard.lock().unwrap() = entries;
        }

        /// Make every lookup of `identifier` fail.
        pub fn fail(&self, identifier: &str) {
            self.failing.lock().unwrap().insert(identifier.to_lowercase());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GameApi for FakeApi {
        fn player<'a>(
            &'a self,
            identifier: &'a str,
        ) -> BoxFuture<'a, Result<PlayerProfile, ApiError>> {
            async move {
                let key = identifier.to_lowercase();
                self.calls.lock().unwrap().push(format!("player:{}", identifier));
                if self.failing.lock().unwrap().contains(&key) {
                    return Err(ApiError::NoData(identifier.to_string()));
                }
                self.players
                    .lock()
                    .unwrap()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ApiError::NoData(identifier.to_string()))
            }
            .boxed()
        }

        fn character<'a>(
            &'a self,
            player: &'a str,
            character_id: &'a str,
        ) -> BoxFuture<'a, Result<CharacterData, ApiError>> {
            async move {
                let key = format!("{}/{}", player.to_lowercase(), character_id);
                self.calls.lock().unwrap().push(format!("character:{}", key));
                if self.failing.lock().unwrap().contains(&player.to_lowercase()) {
                    return Err(ApiError::NoData(key));
                }
                self.characters
                    .lock()
                    .unwrap()
                    .get(&key)
                    .cloned()
                    .ok_or(ApiError::NoData(key))
            }
            .boxed()
        }

        fn world_players<'a>(
            &'a self,
            world: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, ApiError>> {
            async move {
                self.calls.lock().unwrap().push(format!("world:{}", world));
                self.worlds
                    .lock()
                    .unwrap()
                    .get(world)
                    .cloned()
                    .ok_or_else(|| ApiError::NoData(world.to_string()))
            }
            .boxed()
        }

        fn hich_leaderboard(&self) -> BoxFuture<'_, Result<Vec<LeaderboardEntry>, ApiError>> {
            async move {
                let entries = self.leaderboard.lock().unwrap().clone();
                if entries.is_empty() {
                    return Err(ApiError::NoData("hich leaderboard".into()));
                }
                Ok(entries)
            }
            .boxed()
        }
    }
}
