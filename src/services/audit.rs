//! Missing-repo audit
//!
//! Compares a previously emitted report against the organization's live
//! repository list and surfaces every repository the report lacks. Uses the
//! lightweight REST listing rather than the full stats query and never
//! touches the harvest state store.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::github::GitHubClient;
use crate::output::csv_sink::read_emitted_repo_names;
use crate::types::OrgName;

/// Returns the live repository names missing from the report, sorted.
pub async fn audit_missing_repos(
    client: &GitHubClient,
    org: &OrgName,
    output_file: &Path,
    per_page: u8,
) -> Result<Vec<String>> {
    let emitted = read_emitted_repo_names(output_file)?;
    info!(
        "Report {} contains {} repositories",
        output_file.display(),
        emitted.len()
    );

    let live = client.list_repository_names(org, per_page).await?;
    info!("Organization {} currently lists {} repositories", org, live.len());

    let missing = diff_missing(live, &emitted);
    if missing.is_empty() {
        info!("No repositories are missing from the report");
    } else {
        for name in &missing {
            warn!("Missing from the report: {}", name);
        }
    }

    Ok(missing)
}

/// Live names not present in the emitted set, sorted ascending.
pub fn diff_missing(live: Vec<String>, emitted: &HashSet<String>) -> Vec<String> {
    let mut missing: Vec<String> = live
        .into_iter()
        .filter(|name| !emitted.contains(name))
        .collect();
    missing.sort();
    missing
}
