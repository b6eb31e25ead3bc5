//! HTML table to row conversion.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

use super::ReportRow;

/// One `<table>` element flattened to cell texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTable {
    /// Whitespace-collapsed text of the whole table.
    pub text: String,
    /// Rows owned by this table (rows of nested tables excluded).
    pub rows: Vec<Vec<String>>,
    /// Whether another table is nested inside this one.
    pub has_nested: bool,
}

impl HtmlTable {
    /// Non-empty cell texts in document order.
    pub fn cells(&self) -> Vec<String> {
        self.rows
            .iter()
            .flatten()
            .filter(|c| !c.is_empty())
            .cloned()
            .collect()
    }
}

/// Parse every table of a document, in document order.
pub fn parse_tables(html: &str) -> Vec<HtmlTable> {
    let document = Html::parse_document(html);
    let (Ok(table_sel), Ok(tr_sel)) = (Selector::parse("table"), Selector::parse("tr")) else {
        return Vec::new();
    };

    document
        .select(&table_sel)
        .map(|table| {
            let rows = table
                .select(&tr_sel)
                .filter(|tr| owning_table(tr).map(|t| t.id()) == Some(table.id()))
                .map(|tr| {
                    tr.children()
                        .filter_map(ElementRef::wrap)
                        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                        .map(|cell| collapse(&cell))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| !cells.is_empty())
                .collect();

            HtmlTable {
                text: collapse(&table),
                rows,
                has_nested: table.select(&table_sel).next().is_some(),
            }
        })
        .collect()
}

/// Tables without nested tables, i.e. the ones that actually hold data.
pub fn leaf_tables(html: &str) -> Vec<HtmlTable> {
    parse_tables(html)
        .into_iter()
        .filter(|t| !t.has_nested)
        .collect()
}

/// Turn the header row into field names and every later row into a
/// [`ReportRow`], with `prefix` fields placed first.
///
/// The header is the first row as wide as most rows in the table, so caption
/// rows above it are skipped. A later row of a different width keeps its
/// cells under positional `column_{i}` names. Blank rows are dropped.
pub fn rows_with_header(table: &HtmlTable, prefix: &[(String, String)]) -> Vec<ReportRow> {
    let Some(start) = header_index(&table.rows) else {
        return Vec::new();
    };
    let names = header_names(&table.rows[start]);

    table.rows[start + 1..]
        .iter()
        .enumerate()
        .filter(|(_, cells)| !is_blank(cells))
        .map(|(i, cells)| {
            let mut row = ReportRow::new();
            for (name, value) in prefix {
                row.push(name, value);
            }
            if cells.len() == names.len() {
                for (name, value) in names.iter().zip(cells) {
                    row.push(name, value);
                }
            } else {
                tracing::warn!(
                    row = start + i + 1,
                    expected = names.len(),
                    found = cells.len(),
                    "table row width differs from header, using positional names"
                );
                for (j, value) in cells.iter().enumerate() {
                    row.push(&format!("column_{j}"), value);
                }
            }
            row
        })
        .collect()
}

/// Index of the first non-blank row with the table's dominant width. Ties
/// between widths go to the wider one.
fn header_index(rows: &[Vec<String>]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for cells in rows.iter().filter(|cells| !is_blank(cells)) {
        *counts.entry(cells.len()).or_insert(0) += 1;
    }
    let (width, _) = counts
        .into_iter()
        .max_by_key(|&(width, count)| (count, width))?;
    rows.iter().position(|cells| cells.len() == width && !is_blank(cells))
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.is_empty())
}

/// Field names for a header row: blanks become `column_{i}`, repeats get a
/// numeric suffix.
fn header_names(header: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    header
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let base = if raw.is_empty() {
                format!("column_{i}")
            } else {
                raw.clone()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}_{count}")
            }
        })
        .collect()
}

fn owning_table<'a>(tr: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    tr.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

pub(crate) fn collapse(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
