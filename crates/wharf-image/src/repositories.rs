//! The `repositories` file of a saved image archive.
//!
//! It maps repository names to tags to layer ids:
//! `{"busybox":{"latest":"2c5ac3f8..."}}`. Exported archives carry exactly one
//! repository with exactly one tag; anything else is rejected rather than
//! guessed at.

use std::collections::BTreeMap;

use wharf_common::{WharfError, WharfResult};

/// Name of the metadata entry inside the archive.
pub const REPOSITORIES_ENTRY: &str = "repositories";

/// Tag every imported image is given.
pub const IMPORT_TAG: &str = "latest";

type Repositories = BTreeMap<String, BTreeMap<String, String>>;

/// Rename the sole repository to `id` and its sole tag to `latest`.
///
/// # Errors
///
/// Returns [`WharfError::RepositoriesFormat`] if the content is not JSON of the
/// expected shape, or holds other than one repository with one tag.
pub fn rewrite_repositories(raw: &[u8], id: &str) -> WharfResult<Vec<u8>> {
    let repositories: Repositories =
        serde_json::from_slice(raw).map_err(|e| WharfError::RepositoriesFormat {
            message: format!("invalid json: {e}"),
        })?;

    if repositories.len() != 1 {
        return Err(WharfError::RepositoriesFormat {
            message: format!("expected 1 repository, found {}", repositories.len()),
        });
    }
    let Some((repository, tags)) = repositories.into_iter().next() else {
        return Err(WharfError::RepositoriesFormat {
            message: "expected 1 repository, found 0".to_string(),
        });
    };

    if tags.len() != 1 {
        return Err(WharfError::RepositoriesFormat {
            message: format!(
                "expected 1 tag for repository {repository}, found {}",
                tags.len()
            ),
        });
    }
    let Some((tag, hash)) = tags.into_iter().next() else {
        return Err(WharfError::RepositoriesFormat {
            message: format!("expected 1 tag for repository {repository}, found 0"),
        });
    };

    tracing::debug!(from = %format!("{repository}:{tag}"), to = %format!("{id}:{IMPORT_TAG}"), "Renaming image");

    let rewritten: Repositories =
        BTreeMap::from([(id.to_string(), BTreeMap::from([(IMPORT_TAG.to_string(), hash)]))]);
    Ok(serde_json::to_vec(&rewritten)?)
}
