//! End-to-end rebuild tests over synthetic workbooks and a tempdir
//! store: the same path the pipelines take after download, minus the
//! network.

use market_stats_etl::aggregate::NATIONWIDE_CODE;
use market_stats_etl::db;
use market_stats_etl::grid::{Cell, Sheet, Workbook};
use market_stats_etl::meta::{self, SourceMeta};
use market_stats_etl::parse::lodging::PREFECTURES;
use market_stats_etl::parse::nights::{self, FileContext, NIGHTS_BINS};
use market_stats_etl::update;

fn t(s: &str) -> Cell {
    Cell::Text(s.into())
}

fn n(v: f64) -> Cell {
    Cell::Number(v)
}

/// A full time-series sheet: every prefecture × two months, with a
/// deliberately wrong 全国 row to prove it gets recomputed.
fn lodging_sheet(name: &str, base: f64) -> Sheet {
    let mut rows = vec![
        vec![Cell::Empty, t("令和7年"), Cell::Empty],
        vec![Cell::Empty, t("2月"), t("3月")],
        vec![t("全国"), n(1.0), n(28_399_999.0)],
    ];
    for (i, (code, pref_name)) in PREFECTURES.iter().enumerate() {
        rows.push(vec![
            t(&format!("{code}{pref_name}")),
            n(base + i as f64),
            n(28_400_000.0 / 47.0),
        ]);
    }
    Sheet::from_rows(name, rows)
}

fn lodging_workbook(base: f64) -> Workbook {
    Workbook::from_sheets(vec![
        lodging_sheet("1-2", base),
        lodging_sheet("2-2", base),
        lodging_sheet("3-2", base),
    ])
}

#[test]
fn lodging_rebuild_satisfies_the_nationwide_invariant() {
    let (rows, agg) = update::lodging::rebuild_rows(&lodging_workbook(100.0)).unwrap();
    assert_eq!(agg.months_with_gaps, 0);
    assert_eq!(agg.months_total, 2);
    // 2 months × (47 prefectures + 1 derived nationwide).
    assert_eq!(rows.len(), 96);

    for ym in ["2025-02", "2025-03"] {
        let nat = rows
            .iter()
            .find(|r| r.ym == ym && r.pref_code == NATIONWIDE_CODE)
            .unwrap();
        let sum: f64 = rows
            .iter()
            .filter(|r| r.ym == ym && r.pref_code != NATIONWIDE_CODE)
            .map(|r| r.total.unwrap())
            .sum();
        assert!((nat.total.unwrap() - sum).abs() < 1e-6);
    }

    // The stray 28,399,999 source figure never survives; the derived
    // March total is the exact prefecture sum.
    let march = rows
        .iter()
        .find(|r| r.ym == "2025-03" && r.pref_code == NATIONWIDE_CODE)
        .unwrap();
    assert!((march.total.unwrap() - 28_400_000.0).abs() < 1e-6);
}

#[test]
fn lodging_store_replace_drops_stale_months() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open(&dir.path().join(update::DB_FILE)).unwrap();

    let (rows, _) = update::lodging::rebuild_rows(&lodging_workbook(100.0)).unwrap();
    db::replace_lodging(&conn, &rows).unwrap();
    assert_eq!(db::lodging_row_count(&conn).unwrap(), 96);

    // A later source revision with only one month left.
    let single = Workbook::from_sheets(vec![
        one_month_sheet("1-2"),
        one_month_sheet("2-2"),
        one_month_sheet("3-2"),
    ]);
    let (rows2, _) = update::lodging::rebuild_rows(&single).unwrap();
    db::replace_lodging(&conn, &rows2).unwrap();

    let all = db::fetch_lodging_range(&conn, "2000-01", "2099-12").unwrap();
    assert!(all.iter().all(|r| r.ym == "2025-04"));
}

fn one_month_sheet(name: &str) -> Sheet {
    let mut rows = vec![
        vec![Cell::Empty, t("令和7年")],
        vec![Cell::Empty, t("4月")],
    ];
    for (code, pref_name) in PREFECTURES {
        rows.push(vec![t(&format!("{code}{pref_name}")), n(10.0)]);
    }
    Sheet::from_rows(name, rows)
}

#[test]
fn unchanged_digest_skips_without_touching_the_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(meta::LODGING_META_FILE);

    let m = SourceMeta {
        source_page_url: "https://example/page".into(),
        source_sha256: Some("abc123".into()),
        ..Default::default()
    };
    meta::save(&path, &m).unwrap();
    let before = std::fs::read(&path).unwrap();

    // Identical digest: the change detector reports a no-op and the
    // pipeline performs no writes, so the sidecar bytes are untouched.
    let prev = meta::load(&path).unwrap();
    assert!(!meta::digest_changed(prev.as_ref(), "abc123"));
    assert_eq!(std::fs::read(&path).unwrap(), before);

    // Any byte-level change upstream rehashes, even if cell values were
    // semantically identical.
    assert!(meta::digest_changed(prev.as_ref(), "def456"));
}

fn t06_workbook() -> Workbook {
    let mut rows = vec![vec![t("旅行・観光消費動向調査 2025年1-3月期（確報）")]];
    rows.push(vec![t("宿泊数")]);
    for (i, bin) in NIGHTS_BINS.iter().enumerate() {
        rows.push(vec![
            t(bin),
            n((i + 1) as f64 * 100.0),
            Cell::Empty,
            Cell::Empty,
            n((i + 1) as f64),
        ]);
    }
    Workbook::from_sheets(vec![
        Sheet::from_rows("表題", vec![vec![t("2025年1-3月期（確報）")]]),
        Sheet::from_rows("T06", rows),
    ])
}

#[test]
fn nights_rebuild_roundtrips_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open(&dir.path().join(update::DB_FILE)).unwrap();

    let wb = t06_workbook();
    let title = nights::parse_title(&nights::title_cell(&wb), "集計表").unwrap();
    let (sheet, sections) = nights::nights_sections(&wb).unwrap();
    let ctx = FileContext {
        source_url: "https://example/t06.xlsx",
        source_title: "2025年1-3月期（確報）",
        source_sha256: "abc123",
    };
    let rows = nights::extract_rows(sheet, &sections, &ctx, &title).unwrap();

    // 8 bins × 2 segments, fixed order, one period.
    assert_eq!(rows.len(), 16);
    db::replace_nights(&conn, &rows).unwrap();

    let stored = db::fetch_nights_for_source(&conn, "https://example/t06.xlsx", "abc123").unwrap();
    assert_eq!(stored.len(), 16);
    let bins: Vec<&str> = stored
        .iter()
        .filter(|r| r.segment == "domestic_total")
        .map(|r| r.nights_bin.as_str())
        .collect();
    assert_eq!(bins, NIGHTS_BINS.to_vec());

    // Unchanged (url, sha) set against a populated table is a no-op.
    let current = vec![("https://example/t06.xlsx".to_string(), "abc123".to_string())];
    let prev = SourceMeta {
        processed_files: vec![meta::ProcessedFile {
            url: "https://example/t06.xlsx".into(),
            sha256: "abc123".into(),
            title: String::new(),
            fetched_at: String::new(),
        }],
        ..Default::default()
    };
    assert!(!meta::file_set_changed(Some(&prev), &current));
    assert!(db::nights_row_count(&conn).unwrap() > 0);
}
