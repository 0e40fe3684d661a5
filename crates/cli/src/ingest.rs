//! Asset inventory ingestion.
//!
//! The inventory is a JSON array of assets. An unreadable or malformed
//! inventory aborts the run — it is the single pre-pipeline failure that
//! stops everything; entries without an id or name are skipped with a
//! warning, matching how partially filled inventory rows are treated.

use std::path::Path;

use tracing::warn;

use pipeline::artifact::Asset;
use pipeline::TaraError;

/// Reads the asset inventory, dropping unusable entries.
pub fn read_assets(path: &Path) -> Result<Vec<Asset>, TaraError> {
    let text = std::fs::read_to_string(path).map_err(|e| TaraError::RunAborted {
        reason: format!("cannot read asset inventory {}: {e}", path.display()),
    })?;
    let assets: Vec<Asset> = serde_json::from_str(&text).map_err(|e| TaraError::RunAborted {
        reason: format!("asset inventory {} is not valid JSON: {e}", path.display()),
    })?;

    let mut usable = Vec::with_capacity(assets.len());
    for asset in assets {
        if asset.id.as_str().trim().is_empty() || asset.name.trim().is_empty() {
            warn!("skipping inventory entry without id or name");
            continue;
        }
        usable.push(asset);
    }
    Ok(usable)
}
