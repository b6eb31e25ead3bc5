//! Per-course score detail.

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use super::table::{collapse, leaf_tables, rows_with_header};
use super::ReportRow;
use crate::error::ScrapeError;
use crate::portal::controls;

/// A course offered by the listing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub code: String,
    pub name: String,
}

/// Score breakdown of one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreEntry {
    pub course: String,
    pub code: String,
    pub details: Vec<ReportRow>,
}

/// Courses listed as `CRSNO` radio buttons, in page order.
///
/// The course name is the text of the second cell after the radio's cell;
/// the code stands in when that cell is missing or blank.
pub fn parse_courses(html: &str) -> Vec<Course> {
    let document = Html::parse_document(html);
    let Ok(radio_sel) = Selector::parse(&crate::portal::by_name("input", controls::COURSE)) else {
        return Vec::new();
    };

    let mut courses: Vec<Course> = Vec::new();
    for radio in document.select(&radio_sel) {
        let Some(code) = radio
            .value()
            .attr("value")
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            continue;
        };
        if courses.iter().any(|c| c.code == code) {
            continue;
        }

        let name = radio
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "td")
            .and_then(|cell| {
                cell.next_siblings()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "td")
                    .nth(1)
            })
            .map(|el| collapse(&el))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| code.to_string());

        courses.push(Course {
            code: code.to_string(),
            name,
        });
    }
    courses
}

/// Rows of the first data table in a course's detail document.
pub fn parse_detail(html: &str) -> Result<Vec<ReportRow>, ScrapeError> {
    let table = leaf_tables(html)
        .into_iter()
        .next()
        .ok_or_else(|| ScrapeError::ItemExtraction("detail has no table".to_string()))?;
    let rows = rows_with_header(&table, &[]);
    if rows.is_empty() {
        return Err(ScrapeError::ItemExtraction(
            "detail table has no rows".to_string(),
        ));
    }
    Ok(rows)
}
