//! Historical grades by academic year and term.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::form::select_options;
use super::rank::{parse_rank_stats, RankStats};
use super::table::{leaf_tables, rows_with_header};
use super::ReportRow;
use crate::portal::{controls, fields, markers};

/// Terms queried when the listing has no term selector.
pub const FALLBACK_TERMS: [&str; 2] = ["1", "2"];

/// Statistics block of one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankBlock {
    pub year: String,
    pub term: String,
    /// Non-empty cell texts of the block, as displayed.
    pub values: Vec<String>,
    pub stats: RankStats,
}

/// Every grade row and rank block gathered across terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GradesReport {
    pub grades: Vec<ReportRow>,
    pub rank_stats: Vec<RankBlock>,
}

impl GradesReport {
    pub fn merge(&mut self, term: TermResult) {
        self.grades.extend(term.rows);
        self.rank_stats.extend(term.rank);
    }
}

/// What one (year, term) query returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermResult {
    pub rows: Vec<ReportRow>,
    pub rank: Vec<RankBlock>,
}

/// Classify a term's result document.
///
/// A "no data" notice yields an empty result. Otherwise grade tables become
/// rows prefixed with the year and term, and statistics tables become rank
/// blocks.
pub fn classify_term_response(html: &str, year: &str, term: &str) -> TermResult {
    let mut result = TermResult::default();
    if html.contains(markers::NO_DATA) {
        tracing::debug!(year, term, "no records for term");
        return result;
    }

    let prefix = [
        (fields::YEAR.to_string(), year.to_string()),
        (fields::TERM.to_string(), term.to_string()),
    ];
    for table in leaf_tables(html) {
        if table.text.contains(markers::GRADE_TABLE) {
            result.rows.extend(rows_with_header(&table, &prefix));
        } else if table.text.contains(markers::RANK_BLOCK) {
            result.rank.push(RankBlock {
                year: year.to_string(),
                term: term.to_string(),
                values: table.cells(),
                stats: parse_rank_stats(&table.text),
            });
        }
    }
    result
}

/// ROC academic year in progress on `today`. The year turns over in August.
pub fn academic_year(today: NaiveDate) -> i32 {
    if today.month() >= 8 {
        today.year() - 1911
    } else {
        today.year() - 1912
    }
}

/// The current academic year and the ones before it, newest first.
pub fn fallback_years(today: NaiveDate, count: usize) -> Vec<String> {
    let current = academic_year(today);
    (0..count as i32)
        .map(|back| (current - back).to_string())
        .collect()
}

/// The (year, term) pairs to query, in order, from the listing document.
pub fn term_plan(
    listing_html: &str,
    max_years: usize,
    max_terms: usize,
    today: NaiveDate,
) -> Vec<(String, String)> {
    let years = select_options(listing_html, controls::YEAR)
        .map(|opts| option_values(opts, max_years))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback_years(today, max_years));
    let terms = select_options(listing_html, controls::TERM)
        .map(|opts| option_values(opts, max_terms))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| {
            FALLBACK_TERMS
                .iter()
                .take(max_terms)
                .map(|t| t.to_string())
                .collect()
        });

    years
        .iter()
        .flat_map(|y| terms.iter().map(move |t| (y.clone(), t.clone())))
        .collect()
}

fn option_values(options: Vec<(String, String)>, limit: usize) -> Vec<String> {
    options
        .into_iter()
        .map(|(value, _)| value)
        .filter(|v| !v.is_empty())
        .take(limit)
        .collect()
}
