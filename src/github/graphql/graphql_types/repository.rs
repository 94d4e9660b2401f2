use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::graphql::graphql_types::issue::IssueStatsConnection;
use crate::github::graphql::graphql_types::pager::PageInfo;
use crate::github::graphql::graphql_types::pull_request::PullRequestStatsConnection;
use crate::github::graphql::graphql_types::CountConnection;

/// GraphQL response type for one page of the organization repository walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRepositoriesResponse {
    pub organization: Option<OrganizationNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationNode {
    pub repositories: OrgRepositoriesConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRepositoriesConnection {
    pub nodes: Vec<RepositoryStatsNode>,
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
}

/// One repository node from the organization walk, with embedded first-page
/// issue and pull-request connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryStatsNode {
    pub name: String,
    pub owner: RepositoryOwner,
    #[serde(rename = "isEmpty")]
    pub is_empty: bool,
    #[serde(rename = "isFork")]
    pub is_fork: bool,
    #[serde(rename = "isArchived")]
    pub is_archived: bool,
    #[serde(rename = "hasWikiEnabled")]
    pub has_wiki_enabled: bool,
    /// Disk usage in kilobytes. The API reports null for empty repositories.
    #[serde(rename = "diskUsage")]
    pub disk_usage: Option<u64>,
    pub url: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "pushedAt")]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    pub branches: CountConnection,
    pub tags: CountConnection,
    #[serde(rename = "branchProtectionRules")]
    pub branch_protection_rules: CountConnection,
    /// Null when the token lacks push access to the repository.
    pub collaborators: Option<CountConnection>,
    #[serde(rename = "commitComments")]
    pub commit_comments: CountConnection,
    pub discussions: CountConnection,
    pub milestones: CountConnection,
    pub releases: CountConnection,
    #[serde(rename = "projectsV2")]
    pub projects_v2: CountConnection,
    pub issues: IssueStatsConnection,
    #[serde(rename = "pullRequests")]
    pub pull_requests: PullRequestStatsConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}
