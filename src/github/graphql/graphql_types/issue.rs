use serde::{Deserialize, Serialize};

use crate::github::graphql::graphql_types::pager::PageInfo;
use crate::github::graphql::graphql_types::CountConnection;

/// GraphQL response type for the issue sub-pagination query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoIssuesResponse {
    pub repository: Option<IssueStatsRepository>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueStatsRepository {
    pub issues: IssueStatsConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueStatsConnection {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
    pub nodes: Vec<IssueStatsNode>,
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
}

/// Comment and timeline-event totals for one issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueStatsNode {
    pub comments: CountConnection,
    #[serde(rename = "timelineItems")]
    pub timeline_items: CountConnection,
}
