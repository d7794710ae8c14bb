//! Parser for the monthly lodging time-series workbook.
//!
//! Three sheets carry the same month × prefecture grid for total,
//! domestic and foreign stay counts. The header is a row of `N月` month
//! labels with an era-year row (平成xx年 / 令和x年) directly above it;
//! year labels sit in merged cells and propagate left to right.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::db::LodgingRow;
use crate::error::UpdateError;
use crate::grid::{compact, Sheet, Workbook};

static MONTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})月$").unwrap());
static ERA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(昭和|平成|令和)([0-9]{1,2}|元)年$").unwrap());
static PREF_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{2})(.+)$").unwrap());

const HEADER_SCAN_ROWS: usize = 30;
const HEADER_SCAN_COLS: usize = 80;
const MAX_MONTH_COLS: usize = 400;
const MAX_REGION_ROWS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Total,
    Jp,
    Foreign,
}

/// Declarative shape of one fixed-layout sheet: which sheet holds which
/// metric. All three share the generic grid extraction below.
pub struct SheetShape {
    pub sheet_name: &'static str,
    pub metric: Metric,
}

pub const LODGING_SHEETS: [SheetShape; 3] = [
    SheetShape {
        sheet_name: "1-2",
        metric: Metric::Total,
    },
    SheetShape {
        sheet_name: "2-2",
        metric: Metric::Jp,
    },
    SheetShape {
        sheet_name: "3-2",
        metric: Metric::Foreign,
    },
];

/// All 47 prefectures, JIS code order.
pub const PREFECTURES: [(&str, &str); 47] = [
    ("01", "北海道"),
    ("02", "青森県"),
    ("03", "岩手県"),
    ("04", "宮城県"),
    ("05", "秋田県"),
    ("06", "山形県"),
    ("07", "福島県"),
    ("08", "茨城県"),
    ("09", "栃木県"),
    ("10", "群馬県"),
    ("11", "埼玉県"),
    ("12", "千葉県"),
    ("13", "東京都"),
    ("14", "神奈川県"),
    ("15", "新潟県"),
    ("16", "富山県"),
    ("17", "石川県"),
    ("18", "福井県"),
    ("19", "山梨県"),
    ("20", "長野県"),
    ("21", "岐阜県"),
    ("22", "静岡県"),
    ("23", "愛知県"),
    ("24", "三重県"),
    ("25", "滋賀県"),
    ("26", "京都府"),
    ("27", "大阪府"),
    ("28", "兵庫県"),
    ("29", "奈良県"),
    ("30", "和歌山県"),
    ("31", "鳥取県"),
    ("32", "島根県"),
    ("33", "岡山県"),
    ("34", "広島県"),
    ("35", "山口県"),
    ("36", "徳島県"),
    ("37", "香川県"),
    ("38", "愛媛県"),
    ("39", "高知県"),
    ("40", "福岡県"),
    ("41", "佐賀県"),
    ("42", "長崎県"),
    ("43", "熊本県"),
    ("44", "大分県"),
    ("45", "宮崎県"),
    ("46", "鹿児島県"),
    ("47", "沖縄県"),
];

fn pref_name_for_code(code: &str) -> Option<&'static str> {
    PREFECTURES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, n)| *n)
}

fn pref_code_for_name(name: &str) -> Option<(&'static str, &'static str)> {
    PREFECTURES
        .iter()
        .find(|(_, n)| *n == name || n.starts_with(name))
        .map(|(c, n)| (*c, *n))
}

#[derive(Debug, PartialEq)]
enum RegionLabel {
    /// A source-provided nationwide row. Never trusted; the aggregator
    /// recomputes it from the prefecture rows.
    Nationwide,
    Prefecture { code: String, name: String },
}

/// Classify a region-column label like `01北海道`, `東京都` or `全 国`.
/// Rows that match neither (notes, unit annotations) return None and are
/// skipped.
fn parse_region_label(raw: &str) -> Option<RegionLabel> {
    let s = compact(raw);
    if s.is_empty() {
        return None;
    }
    if s.starts_with('全') {
        return Some(RegionLabel::Nationwide);
    }
    if let Some(caps) = PREF_LABEL_RE.captures(&s) {
        let code = caps[1].to_string();
        let name = &caps[2];
        let expected = pref_name_for_code(&code)?;
        // Label and static table must agree; suffix-less names (青森 for
        // 青森県) are accepted.
        if name == expected || expected.starts_with(name) {
            return Some(RegionLabel::Prefecture {
                code,
                name: expected.to_string(),
            });
        }
        return None;
    }
    pref_code_for_name(&s).map(|(code, name)| RegionLabel::Prefecture {
        code: code.to_string(),
        name: name.to_string(),
    })
}

/// Convert an era-year label to a Gregorian year.
/// Showa 1 = 1926, Heisei 1 = 1989, Reiwa 1 = 2019; 元 means year 1.
fn era_year_to_gregorian(label: &str) -> Result<i32, UpdateError> {
    let s = compact(label);
    let caps = ERA_RE
        .captures(&s)
        .ok_or_else(|| UpdateError::Parse(format!("unsupported era-year label: {label:?}")))?;
    let n: i32 = if &caps[2] == "元" {
        1
    } else {
        caps[2]
            .parse()
            .map_err(|_| UpdateError::Parse(format!("bad era year number: {label:?}")))?
    };
    let base = match &caps[1] {
        "昭和" => 1925,
        "平成" => 1988,
        _ => 2018,
    };
    Ok(base + n)
}

#[derive(Debug, Clone, Copy)]
struct HeaderLayout {
    year_row: usize,
    month_row: usize,
    first_data_col: usize,
}

/// Locate the `N月` month-label row; the era-year row is the row above.
fn detect_layout(sheet: &Sheet) -> Result<HeaderLayout, UpdateError> {
    for r in 0..HEADER_SCAN_ROWS {
        for c in 0..HEADER_SCAN_COLS {
            if MONTH_RE.is_match(&compact(&sheet.text(r, c))) {
                if r == 0 {
                    return Err(UpdateError::Parse(format!(
                        "sheet {}: month header on first row, no era-year row above",
                        sheet.name
                    )));
                }
                return Ok(HeaderLayout {
                    year_row: r - 1,
                    month_row: r,
                    first_data_col: c,
                });
            }
        }
    }
    Err(UpdateError::Parse(format!(
        "sheet {}: month header row (e.g. 1月) not found",
        sheet.name
    )))
}

/// Walk the month header left to right, pairing each column with its
/// `YYYY-MM` key. Era-year labels live in merged cells, so the last seen
/// label carries forward until the next one.
fn month_columns(sheet: &Sheet, layout: HeaderLayout) -> Result<Vec<(usize, String)>, UpdateError> {
    let mut out = Vec::new();
    let mut current_year: Option<i32> = None;

    for c in layout.first_data_col..layout.first_data_col + MAX_MONTH_COLS {
        let label = compact(&sheet.text(layout.month_row, c));
        if label.is_empty() {
            // Tolerate single gaps; two consecutive blanks end the header.
            if !out.is_empty() && compact(&sheet.text(layout.month_row, c + 1)).is_empty() {
                break;
            }
            continue;
        }
        let Some(m) = MONTH_RE.captures(&label) else {
            if out.is_empty() {
                continue;
            }
            break;
        };

        let year_label = sheet.text(layout.year_row, c);
        if !compact(&year_label).is_empty() {
            current_year = Some(era_year_to_gregorian(&year_label)?);
        }
        let year = current_year.ok_or_else(|| {
            UpdateError::Parse(format!(
                "sheet {}: missing era-year label above month column {}",
                sheet.name,
                c + 1
            ))
        })?;
        let month: u32 = m[1]
            .parse()
            .map_err(|_| UpdateError::Parse(format!("bad month label: {label:?}")))?;
        out.push((c, format!("{year:04}-{month:02}")));
    }

    if out.is_empty() {
        return Err(UpdateError::Parse(format!(
            "sheet {}: no month columns detected",
            sheet.name
        )));
    }
    Ok(out)
}

struct Obs {
    ym: String,
    code: String,
    name: String,
    value: f64,
}

/// Extract all present numeric (month, prefecture) observations from one
/// sheet. Nationwide rows are dropped here; absent cells produce no
/// observation at all (they are absent, not zero).
fn parse_sheet(sheet: &Sheet) -> Result<Vec<Obs>, UpdateError> {
    let layout = detect_layout(sheet)?;
    let ym_cols = month_columns(sheet, layout)?;
    let start_row = layout.month_row + 1;

    let mut out = Vec::new();
    for r in start_row..start_row + MAX_REGION_ROWS {
        let label = sheet.text(r, 0);
        if compact(&label).is_empty() {
            if compact(&sheet.text(r + 1, 0)).is_empty() {
                break;
            }
            continue;
        }
        let Some(region) = parse_region_label(&label) else {
            continue; // note/annotation row
        };
        let RegionLabel::Prefecture { code, name } = region else {
            continue; // source nationwide row, discarded by policy
        };
        for (c, ym) in &ym_cols {
            if let Some(value) = sheet.number(r, *c) {
                out.push(Obs {
                    ym: ym.clone(),
                    code: code.clone(),
                    name: name.clone(),
                    value,
                });
            }
        }
    }

    if out.is_empty() {
        return Err(UpdateError::Parse(format!(
            "sheet {}: no numeric prefecture rows parsed",
            sheet.name
        )));
    }
    Ok(out)
}

/// Parse the three fixed sheets into wide per-(month, prefecture) rows,
/// ordered by (ym, pref_code). No nationwide rows are produced here; the
/// aggregator derives them.
pub fn parse_workbook(wb: &Workbook) -> Result<Vec<LodgingRow>, UpdateError> {
    let mut map: BTreeMap<(String, String), LodgingRow> = BTreeMap::new();

    for shape in &LODGING_SHEETS {
        let sheet = wb.sheet(shape.sheet_name).ok_or_else(|| {
            UpdateError::Parse(format!("sheet {} not found in workbook", shape.sheet_name))
        })?;
        for obs in parse_sheet(sheet)? {
            let row = map
                .entry((obs.ym.clone(), obs.code.clone()))
                .or_insert_with(|| LodgingRow {
                    ym: obs.ym.clone(),
                    pref_code: obs.code.clone(),
                    pref_name: obs.name.clone(),
                    total: None,
                    jp: None,
                    foreign: None,
                });
            match shape.metric {
                Metric::Total => row.total = Some(obs.value),
                Metric::Jp => row.jp = Some(obs.value),
                Metric::Foreign => row.foreign = Some(obs.value),
            }
        }
    }

    Ok(map.into_values().collect())
}
