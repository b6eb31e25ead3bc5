//! Term statistics parsed out of the free-text rank block.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Value used for a statistic the block does not mention.
pub const RANK_FIELD_DEFAULT: &str = "N/A";

/// Summary statistics for one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankStats {
    pub credits_attempted: String,
    pub credits_earned: String,
    pub average_score: String,
    pub rank: String,
    pub class_size: String,
}

impl Default for RankStats {
    fn default() -> Self {
        Self {
            credits_attempted: RANK_FIELD_DEFAULT.to_string(),
            credits_earned: RANK_FIELD_DEFAULT.to_string(),
            average_score: RANK_FIELD_DEFAULT.to_string(),
            rank: RANK_FIELD_DEFAULT.to_string(),
            class_size: RANK_FIELD_DEFAULT.to_string(),
        }
    }
}

struct Patterns {
    attempted: Regex,
    earned: Regex,
    average: Regex,
    rank: Regex,
    class_size: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        attempted: Regex::new(r"修習學分(?:數)?\s*[:：]?\s*([\d.]+)")
            .expect("credits attempted regex is valid"),
        earned: Regex::new(r"實得學分(?:數)?\s*[:：]?\s*([\d.]+)")
            .expect("credits earned regex is valid"),
        average: Regex::new(r"(?:學期)?平均(?:成績|分數)?\s*[:：]?\s*([\d.]+)")
            .expect("average regex is valid"),
        rank: Regex::new(r"(?:排名|名次)\s*[:：]?\s*(\d+)(?:\s*/\s*(\d+))?")
            .expect("rank regex is valid"),
        class_size: Regex::new(r"(?:班級|全班)?人數\s*[:：]?\s*(\d+)")
            .expect("class size regex is valid"),
    })
}

/// Parse the five statistics from a rank block's text.
///
/// A rank written as `12/50` also supplies the class size when no separate
/// head count is given.
pub fn parse_rank_stats(text: &str) -> RankStats {
    let mut stats = RankStats::default();
    let p = patterns();

    let first = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    if let Some(v) = first(&p.attempted) {
        stats.credits_attempted = v;
    }
    if let Some(v) = first(&p.earned) {
        stats.credits_earned = v;
    }
    if let Some(v) = first(&p.average) {
        stats.average_score = v;
    }
    if let Some(caps) = p.rank.captures(text) {
        if let Some(rank) = caps.get(1) {
            stats.rank = rank.as_str().to_string();
        }
        if let Some(size) = caps.get(2) {
            stats.class_size = size.as_str().to_string();
        }
    }
    if let Some(v) = first(&p.class_size) {
        stats.class_size = v;
    }
    stats
}
