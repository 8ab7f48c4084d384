//! One-shot scans: HICH leaderboard sync and the all-servers sweep.

use super::EngineError;
use crate::api::{GameApi, LeaderboardEntry};
use crate::hunted::LevelWindow;
use crate::jobs::{scan_world, track_new_hich, track_new_players};
use crate::notify::{deliver, Notifier, StatusMessage};
use crate::store::{StoreError, TrackerFile};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct LeaderboardSync {
    pub eligible: Vec<LeaderboardEntry>,
    pub added: Vec<String>,
}

impl LeaderboardSync {
    pub fn render(&self, window: LevelWindow) -> String {
        if self.eligible.is_empty() {
            return format!("⛔ No deathless level `{}` players on the HICH leaderboard.", window);
        }
        let mut lines = vec![format!(
            "🏆 **{} deathless level `{}` players on the HICH leaderboard ({} newly tracked):**",
            self.eligible.len(),
            window,
            self.added.len()
        )];
        for e in &self.eligible {
            lines.push(format!(
                "`{}` - Class: `{}`, Level: `{}`",
                e.name, e.character_type, e.character_data.level
            ));
        }
        lines.join("\n")
    }
}

pub async fn sync_leaderboard(
    api: &dyn GameApi,
    tracker: &TrackerFile,
    window: LevelWindow,
) -> Result<LeaderboardSync, EngineError> {
    let eligible: Vec<LeaderboardEntry> = api
        .hich_leaderboard()
        .await?
        .into_iter()
        .filter(|e| e.character_data.deaths == 0 && window.contains(e.character_data.level))
        .collect();

    let candidates: Vec<(&str, &str)> = eligible
        .iter()
        .map(|e| (e.name.as_str(), e.uuid.as_str()))
        .collect();
    let added = track_new_players(tracker, &candidates).await?;
    info!(eligible = eligible.len(), added = added.len(), "leaderboard synced");
    Ok(LeaderboardSync { eligible, added })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub servers: usize,
    pub servers_without_data: usize,
    pub players_checked: usize,
    pub hunted: usize,
    pub hich: usize,
    pub added: Vec<String>,
}

impl SweepReport {
    pub fn render(&self) -> String {
        format!(
            "📊 **Sweep complete**\n\
             • Servers scanned: {}\n\
             • Servers without data: {}\n\
             • Players checked: {}\n\
             • Hunted players found: {} (HICH: {})\n\
             • Newly tracked: {}",
            self.servers,
            self.servers_without_data,
            self.players_checked,
            self.hunted,
            self.hich,
            if self.added.is_empty() {
                "none".to_string()
            } else {
                self.added.join(", ")
            }
        )
    }
}

/// Server names `{region}{n}` for every region and `n` in `1..=per_region`.
pub fn sweep_worlds(regions: &[String], per_region: u32) -> Vec<String> {
    regions
        .iter()
        .flat_map(|r| (1..=per_region).map(move |n| format!("{}{}", r, n)))
        .collect()
}

/// Scan every world in turn, posting a summary per server with hits and a
/// statistics block at the end. Progress is shown on one edited message.
pub async fn sweep(
    api: &dyn GameApi,
    tracker: &TrackerFile,
    worlds: &[String],
    window: LevelWindow,
    sink: &dyn Notifier,
) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport::default();
    let mut status = StatusMessage::new();

    for (i, world) in worlds.iter().enumerate() {
        status
            .update(
                sink,
                &format!("🔎 Sweeping `{}` ({}/{})...", world, i + 1, worlds.len()),
            )
            .await;
        report.servers += 1;

        let scan = match scan_world(api, world, window, None).await {
            Ok(scan) => scan,
            Err(e) => {
                debug!(world = %world, error = %e, "no data for server");
                report.servers_without_data += 1;
                continue;
            }
        };
        report.players_checked += scan.checked;
        if scan.matches.is_empty() {
            continue;
        }

        report.hunted += scan.matches.len();
        report.hich += scan.matches.iter().filter(|m| m.is_hich).count();
        let added = track_new_hich(tracker, &scan.matches).await?;

        let lines: Vec<String> = scan.matches.iter().map(|m| m.describe()).collect();
        deliver(
            sink,
            &format!("📝 **`{}`:** {} hunted\n{}", world, scan.matches.len(), lines.join("\n")),
        )
        .await;
        report.added.extend(added);
    }

    status.update(sink, &format!("✅ Swept {} servers.", report.servers)).await;
    deliver(sink, &report.render()).await;
    info!(
        servers = report.servers,
        hunted = report.hunted,
        added = report.added.len(),
        "sweep done"
    );
    Ok(report)
}
