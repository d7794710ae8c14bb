use std::sync::LazyLock;

use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::error::UpdateError;
use crate::grid::compact;

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// The lodging survey page links the same cumulative workbook under a
/// stable file id; the name hint survives anchor-text rewording.
const LODGING_FILE_HINT: &str = "001912060.xlsx";

/// A candidate spreadsheet link pulled off a publication page.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLink {
    pub url: String,
    pub link_text: String,
}

fn collect_anchors(html: &str, base_url: &str) -> Result<Vec<SheetLink>, UpdateError> {
    let base = Url::parse(base_url)
        .map_err(|e| UpdateError::SourceStructureChanged(format!("bad base url {base_url}: {e}")))?;
    let doc = Html::parse_document(html);
    let mut out = Vec::new();
    for a in doc.select(&ANCHOR_SEL) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(abs) = base.join(href.trim()) else {
            warn!("Skipping unjoinable href: {}", href);
            continue;
        };
        out.push(SheetLink {
            url: abs.to_string(),
            link_text: a.text().collect::<String>().trim().to_string(),
        });
    }
    Ok(out)
}

/// Find the monthly lodging time-series workbook on the publication page.
///
/// Preference ladder: stable file-name hint, then 推移表 anchor text, then
/// the first xlsx link as a last resort. No xlsx link at all means the
/// page markup changed.
pub fn lodging_sheet_url(html: &str, base_url: &str) -> Result<String, UpdateError> {
    let links: Vec<SheetLink> = collect_anchors(html, base_url)?
        .into_iter()
        .filter(|l| l.url.to_lowercase().ends_with(".xlsx"))
        .collect();

    if links.is_empty() {
        return Err(UpdateError::SourceStructureChanged(
            "no .xlsx links found on lodging source page".into(),
        ));
    }

    if let Some(l) = links.iter().find(|l| l.url.contains(LODGING_FILE_HINT)) {
        return Ok(l.url.clone());
    }
    if let Some(l) = links.iter().find(|l| l.link_text.contains("推移表")) {
        return Ok(l.url.clone());
    }
    warn!("Lodging page: neither file hint nor 推移表 label matched, taking first xlsx");
    Ok(links[0].url.clone())
}

/// Find the travel-consumption aggregate tables (集計表) on the survey
/// page, one link per release variant, in page order.
///
/// Anchor text on this page is occasionally mangled, so a `/content/`
/// URL is accepted as an equivalent hint. Prefecture reference tables
/// (都道府県…参考) are a different publication and are excluded.
pub fn nights_sheet_links(html: &str, base_url: &str) -> Result<Vec<SheetLink>, UpdateError> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for link in collect_anchors(html, base_url)? {
        let lower = link.url.to_lowercase();
        if !(lower.ends_with(".xlsx") || lower.ends_with(".xls")) {
            continue;
        }
        let text = compact(&link.link_text);
        let wanted = text.contains("集計表") || lower.contains("/content/");
        if !wanted {
            continue;
        }
        if text.contains("都道府県") && text.contains("参考") {
            continue;
        }
        if seen.insert(link.url.clone()) {
            out.push(link);
        }
    }

    if out.is_empty() {
        return Err(UpdateError::SourceStructureChanged(
            "no 集計表 spreadsheet links found on consumption survey page".into(),
        ));
    }
    info!("Found {} candidate consumption workbooks", out.len());
    Ok(out)
}
