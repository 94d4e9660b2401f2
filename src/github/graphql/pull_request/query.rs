use serde::{Deserialize, Serialize};

use crate::types::{Owner, PageCursor, RepositoryName};

const REVIEW_LIMIT: u8 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoPullRequestsVariable {
    pub owner: Owner,
    pub repository_name: RepositoryName,
    pub page_size: u8,
    pub cursor: Option<PageCursor>,
}

/// Builds the pull-request sub-pagination query.
///
/// No explicit ordering: the connection must keep the default order of the
/// embedded first page whose end cursor seeds this query.
pub fn repo_pull_requests_query() -> String {
    format!(
        r#"
        query($owner: String!, $repository_name: String!, $page_size: Int!, $cursor: String) {{
            repository(owner: $owner, name: $repository_name) {{
                pullRequests(first: $page_size, after: $cursor) {{
                    totalCount
                    nodes {{
                        number
                        comments {{
                            totalCount
                        }}
                        commits {{
                            totalCount
                        }}
                        timelineItems {{
                            totalCount
                        }}
                        reviews(first: {review_limit}) {{
                            totalCount
                            nodes {{
                                comments {{
                                    totalCount
                                }}
                            }}
                        }}
                    }}
                    pageInfo {{
                        hasNextPage
                        endCursor
                    }}
                }}
            }}
        }}"#,
        review_limit = REVIEW_LIMIT,
    )
}
