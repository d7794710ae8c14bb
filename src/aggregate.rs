//! Derived nationwide totals for the lodging table.
//!
//! The workbook's own 全国 row is discarded at parse time; the stored
//! nationwide figures are always the arithmetic sum of the prefecture
//! rows, which is the only way they stay consistent with the regional
//! breakdown.

use std::collections::BTreeMap;

use crate::db::LodgingRow;
use crate::parse::lodging::PREFECTURES;

pub const NATIONWIDE_CODE: &str = "00";
pub const NATIONWIDE_NAME: &str = "全国";

/// Data-quality summary from the aggregation pass. Gaps never block a
/// run; they are only reported.
#[derive(Debug, Default)]
pub struct AggregateOutcome {
    /// Months where at least one prefecture row or count was absent and
    /// therefore summed as zero.
    pub months_with_gaps: usize,
    pub months_total: usize,
}

/// Append one derived `"00"` row per month: each field is the sum over
/// the prefecture rows for that month, with absent values counted as
/// zero. Any pre-existing nationwide rows are dropped first. Output
/// stays sorted by (ym, pref_code); "00" orders before "01".
pub fn add_national_totals(rows: &mut Vec<LodgingRow>) -> AggregateOutcome {
    rows.retain(|r| r.pref_code != NATIONWIDE_CODE);

    #[derive(Default)]
    struct MonthSum {
        total: f64,
        jp: f64,
        foreign: f64,
        pref_count: usize,
        has_absent_field: bool,
    }

    let mut months: BTreeMap<String, MonthSum> = BTreeMap::new();
    for r in rows.iter() {
        let m = months.entry(r.ym.clone()).or_default();
        m.pref_count += 1;
        m.total += r.total.unwrap_or(0.0);
        m.jp += r.jp.unwrap_or(0.0);
        m.foreign += r.foreign.unwrap_or(0.0);
        if r.total.is_none() || r.jp.is_none() || r.foreign.is_none() {
            m.has_absent_field = true;
        }
    }

    let mut outcome = AggregateOutcome {
        months_total: months.len(),
        ..Default::default()
    };

    let mut national = Vec::with_capacity(months.len());
    for (ym, m) in months {
        if m.has_absent_field || m.pref_count < PREFECTURES.len() {
            outcome.months_with_gaps += 1;
        }
        national.push(LodgingRow {
            ym,
            pref_code: NATIONWIDE_CODE.to_string(),
            pref_name: NATIONWIDE_NAME.to_string(),
            total: Some(m.total),
            jp: Some(m.jp),
            foreign: Some(m.foreign),
        });
    }

    rows.extend(national);
    rows.sort_by(|a, b| (&a.ym, &a.pref_code).cmp(&(&b.ym, &b.pref_code)));
    outcome
}
