use serde::{Deserialize, Serialize};

use crate::types::{Owner, PageCursor, RepositoryName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoIssuesVariable {
    pub owner: Owner,
    pub repository_name: RepositoryName,
    pub page_size: u8,
    pub cursor: Option<PageCursor>,
}

/// Builds the issue sub-pagination query.
///
/// No explicit ordering: the connection must keep the default order of the
/// embedded first page whose end cursor seeds this query.
pub fn repo_issues_query() -> String {
    r#"
        query($owner: String!, $repository_name: String!, $page_size: Int!, $cursor: String) {
            repository(owner: $owner, name: $repository_name) {
                issues(first: $page_size, after: $cursor) {
                    totalCount
                    nodes {
                        comments {
                            totalCount
                        }
                        timelineItems {
                            totalCount
                        }
                    }
                    pageInfo {
                        hasNextPage
                        endCursor
                    }
                }
            }
        }"#
    .to_string()
}
