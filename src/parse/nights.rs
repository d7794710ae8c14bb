//! Parser for the travel-consumption survey "nights stayed" tables.
//!
//! Each workbook carries a 表題 (title) sheet whose A1 cell encodes the
//! period and release type, and a `T06` data sheet in which every 宿泊数
//! section header is followed by exactly eight bin rows, 1泊 through
//! 8泊以上. Bin identity comes from row position; the row label is only
//! a consistency check.

use std::sync::LazyLock;

use regex::Regex;

use crate::db::NightsRow;
use crate::error::UpdateError;
use crate::grid::{compact, Sheet, Workbook};

pub const TITLE_SHEET: &str = "表題";
pub const DATA_SHEET: &str = "T06";
pub const SECTION_LABEL: &str = "宿泊数";

/// The eight duration-of-stay categories, in storage order.
pub const NIGHTS_BINS: [&str; 8] = ["1泊", "2泊", "3泊", "4泊", "5泊", "6泊", "7泊", "8泊以上"];

/// Tracked sub-series and their fixed 0-based data columns in `T06`.
pub const SEGMENTS: [(&str, usize); 2] = [("domestic_total", 1), ("domestic_business", 4)];

/// How far above a 宿泊数 header the per-section period label may sit.
const PERIOD_SCAN_ROWS: usize = 20;
const PERIOD_SCAN_COLS: usize = 6;

static QUARTER_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(20\d{2})年([1-9]|1[0-2])-([1-9]|1[0-2])月").unwrap());
static QUARTER_Q_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(20\d{2})年Q([1-4])").unwrap());
static ANNUAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(20\d{2})年").unwrap());
static BIN_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([1-7])泊").unwrap());

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeriodType {
    Annual,
    Quarter,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Annual => "annual",
            PeriodType::Quarter => "quarter",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub period_type: PeriodType,
    pub key: String,
    pub label: String,
}

/// Parse a period out of free text: `2025年1-3月期` and `2025年Q1` are
/// quarters, a bare `2024年` is annual. Returns None when no period is
/// recognizable.
pub fn parse_period(text: &str) -> Option<Period> {
    let normalized: String = compact(text)
        .chars()
        .map(|c| match c {
            '〜' | '～' | '−' | '－' | '―' => '-',
            c => c,
        })
        .collect();

    if let Some(caps) = QUARTER_RANGE_RE.captures(&normalized) {
        let year: i32 = caps[1].parse().ok()?;
        let start_month: u32 = caps[2].parse().ok()?;
        let quarter = (start_month - 1) / 3 + 1;
        return Some(Period {
            period_type: PeriodType::Quarter,
            key: format!("{year}Q{quarter}"),
            label: format!("{year}年Q{quarter}"),
        });
    }
    if let Some(caps) = QUARTER_Q_RE.captures(&normalized) {
        let year = &caps[1];
        let quarter = &caps[2];
        return Some(Period {
            period_type: PeriodType::Quarter,
            key: format!("{year}Q{quarter}"),
            label: format!("{year}年Q{quarter}"),
        });
    }
    if let Some(caps) = ANNUAL_RE.captures(&normalized) {
        let year = &caps[1];
        return Some(Period {
            period_type: PeriodType::Annual,
            key: year.to_string(),
            label: format!("{year}年"),
        });
    }
    None
}

/// Recognize the release type in title or link text: 確報
/// (preliminary-final) or 2次速報 (second preliminary, full-width ２
/// tolerated).
pub fn parse_release_type(text: &str) -> Option<&'static str> {
    if text.contains("確報") {
        return Some("確報");
    }
    if text.contains("2次速報") || text.contains("２次速報") {
        return Some("2次速報");
    }
    None
}

#[derive(Debug, Clone)]
pub struct TitleMeta {
    pub period: Period,
    pub release_type: &'static str,
}

/// The A1 title cell, from the 表題 sheet or the first sheet.
pub fn title_cell(wb: &Workbook) -> String {
    let sheet = wb.sheet(TITLE_SHEET).or_else(|| wb.first_sheet());
    sheet.map(|s| s.text(0, 0)).unwrap_or_default()
}

/// Decode period and release type from the workbook title, falling back
/// to the source page's link text for the release type.
pub fn parse_title(title_a1: &str, link_text: &str) -> Result<TitleMeta, UpdateError> {
    let period = parse_period(title_a1).ok_or_else(|| {
        UpdateError::Parse(format!("failed to parse period from title A1: {title_a1:?}"))
    })?;
    let release_type = parse_release_type(title_a1)
        .or_else(|| parse_release_type(link_text))
        .ok_or_else(|| {
            UpdateError::Parse(format!(
                "unsupported release type in title/link: {title_a1:?} / {link_text:?}"
            ))
        })?;
    Ok(TitleMeta {
        period,
        release_type,
    })
}

/// Normalize a bin row label; used only to cross-check positional
/// assignment, never to decide order.
fn normalize_bin(raw: &str) -> Option<&'static str> {
    let s = compact(raw);
    if s.is_empty() {
        return None;
    }
    if s.contains("8泊") && s.contains("以上") {
        return Some("8泊以上");
    }
    if let Some(caps) = BIN_PREFIX_RE.captures(&s) {
        let idx: usize = caps[1].parse().ok()?;
        return Some(NIGHTS_BINS[idx - 1]);
    }
    NIGHTS_BINS.iter().find(|b| **b == s).copied()
}

/// Locate the data sheet and its 宿泊数 section header rows. None means
/// this workbook is not a nights-stayed table at all (sibling survey
/// publications share the link pattern) and should be skipped upstream.
pub fn nights_sections(wb: &Workbook) -> Option<(&Sheet, Vec<usize>)> {
    let sheet = wb.sheet(DATA_SHEET)?;
    let rows: Vec<usize> = (0..sheet.height())
        .filter(|r| compact(&sheet.text(*r, 0)) == SECTION_LABEL)
        .collect();
    if rows.is_empty() {
        return None;
    }
    Some((sheet, rows))
}

/// Period override for one section: the nearest period label within the
/// 20 rows above the header, else the title period.
fn period_for_section(sheet: &Sheet, section_row: usize, fallback: &Period) -> Period {
    let stop = section_row.saturating_sub(PERIOD_SCAN_ROWS);
    for r in (stop..section_row).rev() {
        for c in 0..PERIOD_SCAN_COLS {
            if let Some(p) = parse_period(&sheet.text(r, c)) {
                return p;
            }
        }
    }
    fallback.clone()
}

/// Provenance carried onto every extracted row.
pub struct FileContext<'a> {
    pub source_url: &'a str,
    pub source_title: &'a str,
    pub source_sha256: &'a str,
}

/// Extract the nights-stayed observations from every section of the data
/// sheet: exactly eight bins per section, in fixed positional order, for
/// each tracked segment. A short section or a conflicting row label is a
/// parse error; the bin set is never truncated.
pub fn extract_rows(
    sheet: &Sheet,
    sections: &[usize],
    ctx: &FileContext,
    title: &TitleMeta,
) -> Result<Vec<NightsRow>, UpdateError> {
    let mut out = Vec::new();

    for &section_row in sections {
        let period = period_for_section(sheet, section_row, &title.period);

        for (offset, expected_bin) in NIGHTS_BINS.iter().enumerate() {
            let row = section_row + offset + 1;
            let label = sheet.text(row, 0);
            match normalize_bin(&label) {
                Some(bin) if bin == *expected_bin => {}
                got => {
                    return Err(UpdateError::Parse(format!(
                        "T06 section at row {}: expected bin {} at row {}, found {:?}",
                        section_row + 1,
                        expected_bin,
                        row + 1,
                        got.map(str::to_string).unwrap_or(label)
                    )));
                }
            }

            for (segment, col) in SEGMENTS {
                let value = sheet.number(row, col).unwrap_or(0.0);
                out.push(NightsRow {
                    period_type: period.period_type.as_str().to_string(),
                    period_key: period.key.clone(),
                    period_label: period.label.clone(),
                    release_type: title.release_type.to_string(),
                    segment: segment.to_string(),
                    nights_bin: expected_bin.to_string(),
                    value,
                    source_url: ctx.source_url.to_string(),
                    source_title: ctx.source_title.to_string(),
                    source_sha256: ctx.source_sha256.to_string(),
                });
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;

    fn t(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn bin_row(label: &str, total: f64, business: f64) -> Vec<Cell> {
        vec![t(label), n(total), Cell::Empty, Cell::Empty, n(business)]
    }

    fn t06_sheet() -> Sheet {
        let mut rows = vec![
            vec![t("2025年1-3月期")],
            vec![t("宿 泊 数")],
        ];
        for (i, bin) in NIGHTS_BINS.iter().enumerate() {
            rows.push(bin_row(bin, (i + 1) as f64 * 10.0, (i + 1) as f64));
        }
        Sheet::from_rows(DATA_SHEET, rows)
    }

    fn ctx() -> FileContext<'static> {
        FileContext {
            source_url: "https://example/t06.xlsx",
            source_title: "旅行・観光消費動向調査 2025年1-3月期（確報）",
            source_sha256: "abc123",
        }
    }

    fn title() -> TitleMeta {
        parse_title("旅行・観光消費動向調査 2025年1-3月期（確報）", "").unwrap()
    }

    #[test]
    fn periods_parse_from_titles() {
        let q = parse_period("2025年1-3月期").unwrap();
        assert_eq!(q.period_type, PeriodType::Quarter);
        assert_eq!(q.key, "2025Q1");
        assert_eq!(q.label, "2025年Q1");

        let q4 = parse_period("2024年10〜12月期").unwrap();
        assert_eq!(q4.key, "2024Q4");

        let q_style = parse_period("2025年Q2 集計表").unwrap();
        assert_eq!(q_style.key, "2025Q2");

        let a = parse_period("2024年 年間値").unwrap();
        assert_eq!(a.period_type, PeriodType::Annual);
        assert_eq!(a.key, "2024");

        assert_eq!(parse_period("集計表"), None);
    }

    #[test]
    fn release_types_recognized() {
        assert_eq!(parse_release_type("2025年1-3月期（確報）"), Some("確報"));
        assert_eq!(parse_release_type("2025年4-6月期（2次速報）"), Some("2次速報"));
        assert_eq!(parse_release_type("（２次速報）"), Some("2次速報"));
        assert_eq!(parse_release_type("速報"), None);
    }

    #[test]
    fn title_release_falls_back_to_link_text() {
        let meta = parse_title("2025年1-3月期", "集計表（確報）").unwrap();
        assert_eq!(meta.release_type, "確報");
        assert!(parse_title("2025年1-3月期", "集計表").is_err());
        assert!(parse_title("集計表（確報）", "").is_err());
    }

    #[test]
    fn bin_labels_normalize() {
        assert_eq!(normalize_bin(" 3泊 "), Some("3泊"));
        assert_eq!(normalize_bin("8泊以上"), Some("8泊以上"));
        assert_eq!(normalize_bin("8 泊 以 上"), Some("8泊以上"));
        assert_eq!(normalize_bin("日帰り"), None);
    }

    #[test]
    fn section_yields_exactly_eight_bins_per_segment() {
        let sheet = t06_sheet();
        let sections = vec![1];
        let rows = extract_rows(&sheet, &sections, &ctx(), &title()).unwrap();
        assert_eq!(rows.len(), 16);

        for (segment, _) in SEGMENTS {
            let bins: Vec<&str> = rows
                .iter()
                .filter(|r| r.segment == segment)
                .map(|r| r.nights_bin.as_str())
                .collect();
            assert_eq!(bins, NIGHTS_BINS.to_vec());
        }
        assert!(rows.iter().all(|r| r.period_key == "2025Q1"));
        assert!(rows.iter().all(|r| r.release_type == "確報"));
    }

    #[test]
    fn section_period_override_beats_title() {
        // Title says Q1 but the label right above the section says Q2.
        let mut rows = vec![vec![t("2025年4-6月期")], vec![t("宿泊数")]];
        for bin in NIGHTS_BINS {
            rows.push(bin_row(bin, 1.0, 1.0));
        }
        let sheet = Sheet::from_rows(DATA_SHEET, rows);
        let extracted = extract_rows(&sheet, &[1], &ctx(), &title()).unwrap();
        assert!(extracted.iter().all(|r| r.period_key == "2025Q2"));
    }

    #[test]
    fn truncated_section_is_parse_error() {
        let mut rows = vec![vec![t("宿泊数")]];
        for bin in &NIGHTS_BINS[..5] {
            rows.push(bin_row(bin, 1.0, 1.0));
        }
        let sheet = Sheet::from_rows(DATA_SHEET, rows);
        let err = extract_rows(&sheet, &[0], &ctx(), &title()).unwrap_err();
        assert!(matches!(err, UpdateError::Parse(_)));
    }

    #[test]
    fn conflicting_bin_label_is_parse_error() {
        let mut rows = vec![vec![t("宿泊数")]];
        for bin in NIGHTS_BINS {
            rows.push(bin_row(bin, 1.0, 1.0));
        }
        // Swap rows 3 and 4: position says 3泊 but the label says 4泊.
        rows.swap(3, 4);
        let sheet = Sheet::from_rows(DATA_SHEET, rows);
        assert!(extract_rows(&sheet, &[0], &ctx(), &title()).is_err());
    }

    #[test]
    fn blank_value_cells_store_zero() {
        let mut rows = vec![vec![t("宿泊数")]];
        for bin in NIGHTS_BINS {
            rows.push(vec![t(bin)]); // labels only, no values
        }
        let sheet = Sheet::from_rows(DATA_SHEET, rows);
        let extracted = extract_rows(&sheet, &[0], &ctx(), &title()).unwrap();
        assert_eq!(extracted.len(), 16);
        assert!(extracted.iter().all(|r| r.value == 0.0));
    }

    #[test]
    fn sections_found_with_padded_labels() {
        let wb = Workbook::from_sheets(vec![t06_sheet()]);
        let (_, sections) = nights_sections(&wb).unwrap();
        assert_eq!(sections, vec![1]);
    }

    #[test]
    fn workbook_without_t06_is_not_a_target() {
        let wb = Workbook::from_sheets(vec![Sheet::from_rows("T01", vec![vec![t("別の表")]])]);
        assert!(nights_sections(&wb).is_none());
    }
}
