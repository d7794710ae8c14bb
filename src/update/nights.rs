//! Consumption/nights pipeline: quarterly and annual nights-stayed
//! survey tables.
//!
//! The survey page links one workbook per period × release type, so a
//! run downloads the whole candidate set, compares the (url → sha256)
//! set against the previous run, and rebuilds the table from the union
//! of all files, reusing previously stored rows for files whose hash
//! did not move and parsing the rest fresh.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, NightsRow};
use crate::error::UpdateError;
use crate::fetch::Fetched;
use crate::grid::Workbook;
use crate::locate::SheetLink;
use crate::meta::{self, AvailablePeriod, ProcessedFile, SourceMeta};
use crate::parse::nights::{self, FileContext, NIGHTS_BINS};
use crate::update::RunOutcome;
use crate::{fetch, locate};

pub const SOURCE_PAGE_URL: &str =
    "https://www.mlit.go.jp/kankocho/siryou/toukei/shouhidoukou.html";

const META_NOTE: &str =
    "最新は同一period_type内で最新period_keyを選び、確報と2次速報が並ぶ場合は確報を優先する。";

pub async fn run(data_dir: &Path) -> Result<RunOutcome, UpdateError> {
    let client = reqwest::Client::new();

    info!("Fetching consumption survey page: {}", SOURCE_PAGE_URL);
    let html = fetch::fetch_page(&client, SOURCE_PAGE_URL).await?;
    let links = locate::nights_sheet_links(&html, SOURCE_PAGE_URL)?;

    let mut files = Vec::with_capacity(links.len());
    for link in links {
        let fetched = fetch::download(&client, &link.url).await?;
        files.push((link, fetched));
    }

    let meta_path = data_dir.join(meta::NIGHTS_META_FILE);
    let prev = meta::load(&meta_path)?;
    let current: Vec<(String, String)> = files
        .iter()
        .map(|(_, f)| (f.url.clone(), f.sha256.clone()))
        .collect();

    let conn = db::open(&data_dir.join(crate::update::DB_FILE))?;
    // Matching hashes alone don't prove the store holds rows; an empty
    // or missing table still forces a rebuild.
    if !meta::file_set_changed(prev.as_ref(), &current) && db::nights_row_count(&conn)? > 0 {
        info!("Consumption source unchanged ({} files)", current.len());
        return Ok(RunOutcome::NoChange);
    }

    rebuild(&conn, prev.as_ref(), &files, &meta_path)
}

/// One downloaded workbook's fate during a rebuild.
enum FileRows {
    Parsed { rows: Vec<NightsRow>, title: String },
    /// Sibling publications share the link pattern but aren't
    /// nights-stayed tables; they're skipped, not fatal.
    NotTarget(String),
}

fn parse_file(bytes: &[u8], url: &str, link_text: &str, sha256: &str) -> Result<FileRows, UpdateError> {
    let wb = match Workbook::from_xlsx_bytes(bytes) {
        Ok(wb) => wb,
        Err(e) => return Ok(FileRows::NotTarget(format!("open failed: {e}"))),
    };

    let title_a1 = nights::title_cell(&wb);
    let Some((sheet, sections)) = nights::nights_sections(&wb) else {
        return Ok(FileRows::NotTarget(format!(
            "no {} sections in sheet {}",
            nights::SECTION_LABEL,
            nights::DATA_SHEET
        )));
    };
    let title = match nights::parse_title(&title_a1, link_text) {
        Ok(t) => t,
        Err(e) => return Ok(FileRows::NotTarget(e.to_string())),
    };

    let ctx = FileContext {
        source_url: url,
        source_title: &title_a1,
        source_sha256: sha256,
    };
    // A recognized section with a malformed bin block is a real shape
    // violation, not a non-target file; it aborts the run.
    let rows = nights::extract_rows(sheet, &sections, &ctx, &title)?;
    Ok(FileRows::Parsed {
        rows,
        title: title_a1,
    })
}

fn rebuild(
    conn: &Connection,
    prev: Option<&SourceMeta>,
    files: &[(SheetLink, Fetched)],
    meta_path: &Path,
) -> Result<RunOutcome, UpdateError> {
    let prev_files: BTreeMap<&str, &ProcessedFile> = prev
        .map(|m| {
            m.processed_files
                .iter()
                .map(|f| (f.url.as_str(), f))
                .collect()
        })
        .unwrap_or_default();

    let fetched_at = chrono::Utc::now().to_rfc3339();
    let mut all_rows: Vec<NightsRow> = Vec::new();
    let mut processed: Vec<ProcessedFile> = Vec::new();

    for (link, fetched) in files {
        let mut entry = ProcessedFile {
            url: fetched.url.clone(),
            sha256: fetched.sha256.clone(),
            title: String::new(),
            fetched_at: fetched_at.clone(),
        };

        // Unchanged file: carry its stored rows across instead of
        // re-parsing.
        let prev_entry = prev_files.get(fetched.url.as_str());
        if prev_entry.map(|f| f.sha256.as_str()) == Some(fetched.sha256.as_str()) {
            let reused = db::fetch_nights_for_source(conn, &fetched.url, &fetched.sha256)?;
            if !reused.is_empty() {
                info!("Reused cached rows: {}", fetched.url);
                entry.title = reused[0].source_title.clone();
                all_rows.extend(reused);
                processed.push(entry);
                continue;
            }
        }

        match parse_file(&fetched.bytes, &fetched.url, &link.link_text, &fetched.sha256)? {
            FileRows::Parsed { rows, title } => {
                info!("Parsed {} rows from {}", rows.len(), fetched.url);
                entry.title = title;
                all_rows.extend(rows);
            }
            FileRows::NotTarget(reason) => {
                warn!("Skipped non-target workbook {}: {}", fetched.url, reason);
                // Keep whatever title the last run recorded for this URL.
                if let Some(f) = prev_entry {
                    entry.title = f.title.clone();
                }
            }
        }
        processed.push(entry);
    }

    if all_rows.is_empty() {
        return Err(UpdateError::SourceStructureChanged(
            "no parsable nights-stayed workbooks among the candidate links".into(),
        ));
    }

    sort_rows(&mut all_rows);
    db::replace_nights(conn, &all_rows)?;

    let available_periods = build_available_periods(&all_rows);
    let (min_key, max_key) = key_range(&all_rows);

    let new_meta = SourceMeta {
        source_page_url: SOURCE_PAGE_URL.to_string(),
        fetched_at,
        row_count: all_rows.len(),
        min_key: Some(min_key.clone()),
        max_key: Some(max_key.clone()),
        processed_files: processed,
        available_periods,
        note: META_NOTE.to_string(),
        ..Default::default()
    };
    meta::save(meta_path, &new_meta)?;

    info!("Nights store rebuilt: {} rows", all_rows.len());
    Ok(RunOutcome::Updated {
        rows: all_rows.len(),
        min_key,
        max_key,
    })
}

fn bin_index(bin: &str) -> usize {
    NIGHTS_BINS.iter().position(|b| *b == bin).unwrap_or(NIGHTS_BINS.len())
}

fn sort_rows(rows: &mut [NightsRow]) {
    rows.sort_by(|a, b| {
        (
            &a.period_type,
            &a.period_key,
            &a.release_type,
            bin_index(&a.nights_bin),
            &a.segment,
            &a.source_url,
        )
            .cmp(&(
                &b.period_type,
                &b.period_key,
                &b.release_type,
                bin_index(&b.nights_bin),
                &b.segment,
                &b.source_url,
            ))
    });
}

/// `2025Q1` → (2025, 1); `2024` → (2024, 0). Unparseable keys sort
/// last-oldest.
fn period_sort_key(key: &str) -> (i32, u8) {
    if let Some((y, q)) = key.split_once('Q') {
        if let (Ok(y), Ok(q)) = (y.parse(), q.parse()) {
            return (y, q);
        }
    }
    if let Ok(y) = key.parse() {
        return (y, 0);
    }
    (0, 0)
}

fn build_available_periods(rows: &[NightsRow]) -> Vec<AvailablePeriod> {
    let mut grouped: BTreeMap<(String, String, String), Vec<String>> = BTreeMap::new();
    for r in rows {
        let releases = grouped
            .entry((
                r.period_type.clone(),
                r.period_key.clone(),
                r.period_label.clone(),
            ))
            .or_default();
        if !releases.contains(&r.release_type) {
            releases.push(r.release_type.clone());
        }
    }

    let mut out: Vec<AvailablePeriod> = grouped
        .into_iter()
        .map(|((period_type, period_key, period_label), mut releases)| {
            // 確報 ahead of 2次速報 for the same period.
            releases.sort_by_key(|r| if r == "確報" { 0 } else { 1 });
            AvailablePeriod {
                period_type,
                period_key,
                period_label,
                releases,
            }
        })
        .collect();
    out.sort_by_key(|p| std::cmp::Reverse(period_sort_key(&p.period_key)));
    out
}

fn key_range(rows: &[NightsRow]) -> (String, String) {
    let min = rows.iter().min_by_key(|r| period_sort_key(&r.period_key));
    let max = rows.iter().max_by_key(|r| period_sort_key(&r.period_key));
    (
        min.map(|r| r.period_key.clone()).unwrap_or_default(),
        max.map(|r| r.period_key.clone()).unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ptype: &str, key: &str, release: &str, bin: &str) -> NightsRow {
        NightsRow {
            period_type: ptype.into(),
            period_key: key.into(),
            period_label: format!("{key}期"),
            release_type: release.into(),
            segment: "domestic_total".into(),
            nights_bin: bin.into(),
            value: 1.0,
            source_url: "https://example/x.xlsx".into(),
            source_title: "t".into(),
            source_sha256: "s".into(),
        }
    }

    #[test]
    fn non_target_files_keep_their_recorded_title() {
        let dir = tempfile::tempdir().unwrap();
        let conn = rusqlite::Connection::open_in_memory().unwrap();

        // Rows already stored for the unchanged workbook.
        let cached = row("quarter", "2025Q1", "確報", "1泊");
        db::replace_nights(&conn, &[cached.clone()]).unwrap();

        let prev = SourceMeta {
            processed_files: vec![
                ProcessedFile {
                    url: cached.source_url.clone(),
                    sha256: cached.source_sha256.clone(),
                    title: cached.source_title.clone(),
                    fetched_at: String::new(),
                },
                ProcessedFile {
                    url: "https://example/other.xlsx".into(),
                    sha256: "zzz".into(),
                    title: "概要表".into(),
                    fetched_at: String::new(),
                },
            ],
            ..Default::default()
        };

        let files = vec![
            (
                SheetLink {
                    url: cached.source_url.clone(),
                    link_text: String::new(),
                },
                Fetched {
                    url: cached.source_url.clone(),
                    bytes: Vec::new(),
                    sha256: cached.source_sha256.clone(),
                },
            ),
            // Not a workbook at all; it must be skipped, with the title
            // the last run recorded for this URL carried forward.
            (
                SheetLink {
                    url: "https://example/other.xlsx".into(),
                    link_text: String::new(),
                },
                Fetched {
                    url: "https://example/other.xlsx".into(),
                    bytes: b"not an xlsx".to_vec(),
                    sha256: "zzz".into(),
                },
            ),
        ];

        let meta_path = dir.path().join(meta::NIGHTS_META_FILE);
        rebuild(&conn, Some(&prev), &files, &meta_path).unwrap();

        let saved = meta::load(&meta_path).unwrap().unwrap();
        let other = saved
            .processed_files
            .iter()
            .find(|f| f.url.ends_with("other.xlsx"))
            .unwrap();
        assert_eq!(other.title, "概要表");
    }

    #[test]
    fn available_periods_prefer_kakuhou_and_sort_newest_first() {
        let rows = vec![
            row("quarter", "2024Q4", "確報", "1泊"),
            row("quarter", "2025Q1", "2次速報", "1泊"),
            row("quarter", "2025Q1", "確報", "1泊"),
            row("annual", "2024", "確報", "1泊"),
        ];
        let periods = build_available_periods(&rows);
        let keys: Vec<&str> = periods.iter().map(|p| p.period_key.as_str()).collect();
        assert_eq!(keys, vec!["2025Q1", "2024Q4", "2024"]);

        let q1 = periods.iter().find(|p| p.period_key == "2025Q1").unwrap();
        assert_eq!(q1.releases, vec!["確報", "2次速報"]);
    }

    #[test]
    fn rows_sort_in_fixed_bin_order() {
        let mut rows = vec![
            row("quarter", "2025Q1", "確報", "8泊以上"),
            row("quarter", "2025Q1", "確報", "2泊"),
            row("quarter", "2025Q1", "確報", "1泊"),
        ];
        sort_rows(&mut rows);
        let bins: Vec<&str> = rows.iter().map(|r| r.nights_bin.as_str()).collect();
        assert_eq!(bins, vec!["1泊", "2泊", "8泊以上"]);
    }

    #[test]
    fn key_range_spans_annual_and_quarterly_keys() {
        let rows = vec![
            row("annual", "2023", "確報", "1泊"),
            row("quarter", "2025Q2", "確報", "1泊"),
            row("quarter", "2024Q1", "確報", "1泊"),
        ];
        let (min, max) = key_range(&rows);
        assert_eq!(min, "2023");
        assert_eq!(max, "2025Q2");
    }

    #[test]
    fn period_sort_keys_order_quarters_after_the_year() {
        assert!(period_sort_key("2025Q1") > period_sort_key("2025"));
        assert!(period_sort_key("2025") > period_sort_key("2024Q4"));
    }
}
