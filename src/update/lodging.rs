//! Lodging pipeline: monthly prefecture-level stay counts.
//!
//! Linear sequence per run: locate the workbook on the publication page,
//! download and hash it, stop if the digest matches the last run, parse
//! the three fixed sheets, derive nationwide totals, swap the store
//! table, then overwrite the provenance sidecar.

use std::path::Path;

use tracing::{info, warn};

use crate::aggregate::{self, AggregateOutcome};
use crate::db::{self, LodgingRow};
use crate::error::UpdateError;
use crate::grid::Workbook;
use crate::update::RunOutcome;
use crate::{fetch, locate, meta, parse};

pub const SOURCE_PAGE_URL: &str =
    "https://www.mlit.go.jp/kankocho/tokei_hakusyo/shukuhakutokei.html";

/// The rebuild core: workbook in, full replacement record set out. Pure
/// with respect to network and disk so tests can drive it directly.
pub fn rebuild_rows(wb: &Workbook) -> Result<(Vec<LodgingRow>, AggregateOutcome), UpdateError> {
    let mut rows = parse::lodging::parse_workbook(wb)?;
    let outcome = aggregate::add_national_totals(&mut rows);
    Ok((rows, outcome))
}

pub async fn run(data_dir: &Path) -> Result<RunOutcome, UpdateError> {
    let client = reqwest::Client::new();

    info!("Fetching lodging source page: {}", SOURCE_PAGE_URL);
    let html = fetch::fetch_page(&client, SOURCE_PAGE_URL).await?;
    let xlsx_url = locate::lodging_sheet_url(&html, SOURCE_PAGE_URL)?;
    let fetched = fetch::download(&client, &xlsx_url).await?;

    let meta_path = data_dir.join(meta::LODGING_META_FILE);
    let prev = meta::load(&meta_path)?;
    if !meta::digest_changed(prev.as_ref(), &fetched.sha256) {
        info!(
            "Lodging source unchanged (sha256 {}...)",
            &fetched.sha256[..12]
        );
        return Ok(RunOutcome::NoChange);
    }

    let wb = Workbook::from_xlsx_bytes(&fetched.bytes)?;
    let (rows, agg) = rebuild_rows(&wb)?;
    if agg.months_with_gaps > 0 {
        warn!(
            "{} of {} months had absent prefecture inputs (summed as zero)",
            agg.months_with_gaps, agg.months_total
        );
    }

    let conn = db::open(&data_dir.join(crate::update::DB_FILE))?;
    db::replace_lodging(&conn, &rows)?;

    // Rows are sorted by (ym, pref_code); the month range falls out of
    // the endpoints.
    let min_key = rows.first().map(|r| r.ym.clone()).unwrap_or_default();
    let max_key = rows.last().map(|r| r.ym.clone()).unwrap_or_default();

    let new_meta = meta::SourceMeta {
        source_page_url: SOURCE_PAGE_URL.to_string(),
        source_file_url: Some(fetched.url.clone()),
        source_sha256: Some(fetched.sha256.clone()),
        fetched_at: chrono::Utc::now().to_rfc3339(),
        row_count: rows.len(),
        min_key: Some(min_key.clone()),
        max_key: Some(max_key.clone()),
        ..Default::default()
    };
    meta::save(&meta_path, &new_meta)?;

    info!("Lodging store rebuilt: {} rows", rows.len());
    Ok(RunOutcome::Updated {
        rows: rows.len(),
        min_key,
        max_key,
    })
}
