use serde::{Deserialize, Serialize};

use crate::types::{OrgName, PageCursor};

/// Reviews fetched inline per pull request. Review pages beyond the first are
/// not walked; their comment totals come from the embedded nodes only.
const REVIEW_LIMIT: u8 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRepositoriesVariable {
    pub login: OrgName,
    pub page_size: u8,
    pub cursor: Option<PageCursor>,
}

/// Builds the organization walk query.
///
/// Repositories are ordered by name ascending so that cursors stay
/// deterministic across resumed runs. Each node embeds the first
/// `extra_page_size` issues and pull requests together with the cursors
/// needed to continue each sub-connection.
pub fn org_repositories_query(extra_page_size: u8) -> String {
    format!(
        r#"
        query($login: String!, $page_size: Int!, $cursor: String) {{
            organization(login: $login) {{
                repositories(first: $page_size, after: $cursor, orderBy: {{field: NAME, direction: ASC}}) {{
                    nodes {{
                        name
                        owner {{
                            login
                        }}
                        isEmpty
                        isFork
                        isArchived
                        hasWikiEnabled
                        diskUsage
                        url
                        createdAt
                        pushedAt
                        updatedAt
                        branches: refs(refPrefix: "refs/heads/") {{
                            totalCount
                        }}
                        tags: refs(refPrefix: "refs/tags/") {{
                            totalCount
                        }}
                        branchProtectionRules {{
                            totalCount
                        }}
                        collaborators {{
                            totalCount
                        }}
                        commitComments {{
                            totalCount
                        }}
                        discussions {{
                            totalCount
                        }}
                        milestones {{
                            totalCount
                        }}
                        releases {{
                            totalCount
                        }}
                        projectsV2 {{
                            totalCount
                        }}
                        issues(first: {extra_page_size}) {{
                            totalCount
                            nodes {{
                                comments {{
                                    totalCount
                                }}
                                timelineItems {{
                                    totalCount
                                }}
                            }}
                            pageInfo {{
                                hasNextPage
                                endCursor
                            }}
                        }}
                        pullRequests(first: {extra_page_size}) {{
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
                    pageInfo {{
                        hasNextPage
                        endCursor
                    }}
                }}
            }}
        }}"#,
        extra_page_size = extra_page_size,
        review_limit = REVIEW_LIMIT,
    )
}
