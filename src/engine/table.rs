//! Fixed-width table of tracked characters, split into chat-sized pages.

use crate::store::TrackedEntity;

pub const ROWS_PER_PAGE: usize = 10;

const GATHERING: [&str; 4] = ["fishing", "mining", "woodcutting", "farming"];

fn header() -> String {
    format!(
        "{:<16} {:<10} {:>7} {:>7} {:>7} {:>11} {:>7} {:>9}",
        "Player", "Class", "Combat", "Fishing", "Mining", "Woodcutting", "Farming", "Prof Avg"
    )
}

fn row(e: &TrackedEntity) -> String {
    let levels: Vec<f64> = GATHERING.iter().map(|p| e.profession(p)).collect();
    let average = levels.iter().sum::<f64>() / levels.len() as f64;
    format!(
        "{:<16} {:<10} {:>7.2} {:>7.2} {:>7.2} {:>11.2} {:>7.2} {:>9.2}",
        e.display_name, e.class_tag, e.combat_level, levels[0], levels[1], levels[2], levels[3], average
    )
}

/// One code-block page per [`ROWS_PER_PAGE`] entities, each with its own
/// header and a page counter. No pages for no entities.
pub fn render_pages(entities: &[TrackedEntity]) -> Vec<String> {
    let total = entities.len().div_ceil(ROWS_PER_PAGE);
    entities
        .chunks(ROWS_PER_PAGE)
        .enumerate()
        .map(|(i, chunk)| {
            let mut lines = vec![header(), "-".repeat(header().len())];
            lines.extend(chunk.iter().map(row));
            format!("```\n{}\n```\nPage {}/{}", lines.join("\n"), i + 1, total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str) -> TrackedEntity {
        TrackedEntity::parse(&format!(
            "{},MAGE,u,c,combat:50.45,mining:12.00,fishing:4.00",
            name
        ))
        .unwrap()
    }

    #[test]
    fn test_pages_of_ten() {
        let entities: Vec<_> = (0..23).map(|i| entity(&format!("P{}", i))).collect();
        let pages = render_pages(&entities);
        assert_eq!(pages.len(), 3);
        assert!(pages[0].ends_with("Page 1/3"));
        assert!(pages[2].contains("P22"));
        assert!(!pages[2].contains("P9 "));
        assert!(render_pages(&[]).is_empty());
    }

    #[test]
    fn test_row_layout() {
        let r = row(&entity("Alice"));
        assert!(r.starts_with("Alice            MAGE"));
        // (4 + 12 + 0 + 0) / 4
        assert!(r.ends_with("     4.00"));
        assert!(r.contains("  50.45"));
    }
}
