use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::UpdateError;

/// A downloaded source file: raw bytes plus the digest the change
/// detector compares against the previous run.
pub struct Fetched {
    pub url: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fetch a publication page body as text.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String, UpdateError> {
    let res = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| UpdateError::Fetch {
            url: url.to_string(),
            source: e,
        })?;
    res.text().await.map_err(|e| UpdateError::Fetch {
        url: url.to_string(),
        source: e,
    })
}

/// Download a spreadsheet in full and hash the raw bytes. Files are small
/// (a few MB at most); no streaming needed.
pub async fn download(client: &reqwest::Client, url: &str) -> Result<Fetched, UpdateError> {
    let res = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| UpdateError::Fetch {
            url: url.to_string(),
            source: e,
        })?;
    let bytes = res
        .bytes()
        .await
        .map_err(|e| UpdateError::Fetch {
            url: url.to_string(),
            source: e,
        })?
        .to_vec();

    let sha256 = sha256_hex(&bytes);
    info!(
        "Downloaded {} ({} bytes, sha256 {}...)",
        url,
        bytes.len(),
        &sha256[..12]
    );
    Ok(Fetched {
        url: url.to_string(),
        bytes,
        sha256,
    })
}
