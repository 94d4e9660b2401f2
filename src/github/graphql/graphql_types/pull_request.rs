use serde::{Deserialize, Serialize};

use crate::github::graphql::graphql_types::pager::PageInfo;
use crate::github::graphql::graphql_types::CountConnection;

/// GraphQL response type for the pull-request sub-pagination query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoPullRequestsResponse {
    pub repository: Option<PullRequestStatsRepository>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestStatsRepository {
    #[serde(rename = "pullRequests")]
    pub pull_requests: PullRequestStatsConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestStatsConnection {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
    pub nodes: Vec<PullRequestStatsNode>,
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
}

/// Count totals for one pull request, with a first-page embedded review list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestStatsNode {
    pub number: u64,
    pub comments: CountConnection,
    pub commits: CountConnection,
    #[serde(rename = "timelineItems")]
    pub timeline_items: CountConnection,
    pub reviews: ReviewStatsConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewStatsConnection {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
    pub nodes: Vec<ReviewStatsNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewStatsNode {
    pub comments: CountConnection,
}
