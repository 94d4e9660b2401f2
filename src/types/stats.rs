//! Aggregate counters and the flat output row
//!
//! The row shaper is a pure function from one repository snapshot plus its
//! folded issue and pull-request aggregates to the record written to the CSV
//! report. Field order here is the column order downstream readers rely on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::graphql::graphql_types::repository::RepositoryStatsNode;
use crate::types::OrgName;

/// Record-count total at or above which a repository is flagged as a
/// migration risk.
pub const MIGRATION_RECORD_THRESHOLD: i64 = 60_000;

/// Disk size in megabytes above which a repository is flagged as a migration
/// risk.
pub const MIGRATION_SIZE_MB_THRESHOLD: u64 = 1_500;

/// Folded totals over a repository's full (possibly paginated) issue list.
///
/// Event counts are signed: a pull request reporting more redundant events
/// than timeline events produces a negative delta that is preserved verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueAggregates {
    pub issue_count: u64,
    pub issue_comment_count: i64,
    pub issue_event_count: i64,
}

/// Folded totals over a repository's full (possibly paginated) pull-request
/// list, including the PR-derived contributions to the issue event and
/// comment totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestAggregates {
    pub pull_request_count: u64,
    pub review_count: u64,
    pub review_comment_count: u64,
    pub commit_comment_count: u64,
    pub issue_event_count: i64,
    pub issue_comment_count: i64,
}

/// Column headers of the stats report, in emission order.
pub const CSV_COLUMNS: [&str; 29] = [
    "Org_Name",
    "Repo_Name",
    "Is_Empty",
    "Last_Push",
    "Last_Update",
    "isFork",
    "isArchived",
    "Disk_Size_kb",
    "Repo_Size_mb",
    "Record_Count",
    "Collaborator_Count",
    "Protected_Branch_Count",
    "PR_Review_Count",
    "PR_Review_Comment_Count",
    "Commit_Comment_Count",
    "Milestone_Count",
    "PR_Count",
    "Project_Count",
    "Branch_Count",
    "Release_Count",
    "Issue_Count",
    "Issue_Event_Count",
    "Issue_Comment_Count",
    "Tag_Count",
    "Discussion_Count",
    "Has_Wiki",
    "Full_URL",
    "Migration_Issue",
    "Created",
];

/// One emitted report row. Fields are declared in column order; the sink
/// serializes them positionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoStatsRow {
    #[serde(rename = "Org_Name")]
    pub org_name: String,
    #[serde(rename = "Repo_Name")]
    pub repo_name: String,
    #[serde(rename = "Is_Empty")]
    pub is_empty: bool,
    #[serde(rename = "Last_Push")]
    pub last_push: Option<DateTime<Utc>>,
    #[serde(rename = "Last_Update")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(rename = "isFork")]
    pub is_fork: bool,
    #[serde(rename = "isArchived")]
    pub is_archived: bool,
    #[serde(rename = "Disk_Size_kb")]
    pub disk_size_kb: u64,
    #[serde(rename = "Repo_Size_mb")]
    pub repo_size_mb: u64,
    #[serde(rename = "Record_Count")]
    pub record_count: i64,
    #[serde(rename = "Collaborator_Count")]
    pub collaborator_count: u64,
    #[serde(rename = "Protected_Branch_Count")]
    pub protected_branch_count: u64,
    #[serde(rename = "PR_Review_Count")]
    pub pr_review_count: u64,
    #[serde(rename = "PR_Review_Comment_Count")]
    pub pr_review_comment_count: u64,
    #[serde(rename = "Commit_Comment_Count")]
    pub commit_comment_count: u64,
    #[serde(rename = "Milestone_Count")]
    pub milestone_count: u64,
    #[serde(rename = "PR_Count")]
    pub pr_count: u64,
    #[serde(rename = "Project_Count")]
    pub project_count: u64,
    #[serde(rename = "Branch_Count")]
    pub branch_count: u64,
    #[serde(rename = "Release_Count")]
    pub release_count: u64,
    #[serde(rename = "Issue_Count")]
    pub issue_count: u64,
    #[serde(rename = "Issue_Event_Count")]
    pub issue_event_count: i64,
    #[serde(rename = "Issue_Comment_Count")]
    pub issue_comment_count: i64,
    #[serde(rename = "Tag_Count")]
    pub tag_count: u64,
    #[serde(rename = "Discussion_Count")]
    pub discussion_count: u64,
    #[serde(rename = "Has_Wiki")]
    pub has_wiki: bool,
    #[serde(rename = "Full_URL")]
    pub full_url: String,
    #[serde(rename = "Migration_Issue")]
    pub migration_issue: bool,
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
}

/// Sum of every record class a migration has to move for one repository.
///
/// Pull requests are counted twice, once as the PR count and once standing in
/// for the review count, matching the source-of-truth contract of the
/// migration tooling this report feeds.
#[allow(clippy::too_many_arguments)]
pub fn record_count(
    collaborator_count: u64,
    protected_branch_count: u64,
    pr_count: u64,
    milestone_count: u64,
    issue_count: u64,
    pr_review_comment_count: u64,
    commit_comment_count: u64,
    issue_comment_count: i64,
    issue_event_count: i64,
    release_count: u64,
    project_count: u64,
) -> i64 {
    collaborator_count as i64
        + protected_branch_count as i64
        + 2 * pr_count as i64
        + milestone_count as i64
        + issue_count as i64
        + pr_review_comment_count as i64
        + commit_comment_count as i64
        + issue_comment_count
        + issue_event_count
        + release_count as i64
        + project_count as i64
}

/// Whether a repository is likely to trip downstream migration tooling.
pub fn is_migration_risk(record_count: i64, repo_size_mb: u64) -> bool {
    record_count >= MIGRATION_RECORD_THRESHOLD || repo_size_mb > MIGRATION_SIZE_MB_THRESHOLD
}

/// Shapes one output row from a repository snapshot and its aggregates.
///
/// The issue event and comment totals combine the issue-derived and the
/// PR-derived contributions; the commit-comment column carries the PR-derived
/// commit total.
pub fn shape_row(
    org: &OrgName,
    snapshot: &RepositoryStatsNode,
    issues: &IssueAggregates,
    prs: &PullRequestAggregates,
) -> RepoStatsRow {
    let disk_size_kb = snapshot.disk_usage.unwrap_or(0);
    let repo_size_mb = disk_size_kb / 1024;

    let issue_event_count = issues.issue_event_count + prs.issue_event_count;
    let issue_comment_count = issues.issue_comment_count + prs.issue_comment_count;
    let collaborator_count = snapshot
        .collaborators
        .as_ref()
        .map(|connection| connection.total_count)
        .unwrap_or(0);

    let record_count = record_count(
        collaborator_count,
        snapshot.branch_protection_rules.total_count,
        snapshot.pull_requests.total_count,
        snapshot.milestones.total_count,
        snapshot.issues.total_count,
        prs.review_comment_count,
        prs.commit_comment_count,
        issue_comment_count,
        issue_event_count,
        snapshot.releases.total_count,
        snapshot.projects_v2.total_count,
    );

    RepoStatsRow {
        org_name: org.as_str().to_string(),
        repo_name: snapshot.name.clone(),
        is_empty: snapshot.is_empty,
        last_push: snapshot.pushed_at,
        last_update: snapshot.updated_at,
        is_fork: snapshot.is_fork,
        is_archived: snapshot.is_archived,
        disk_size_kb,
        repo_size_mb,
        record_count,
        collaborator_count,
        protected_branch_count: snapshot.branch_protection_rules.total_count,
        pr_review_count: prs.review_count,
        pr_review_comment_count: prs.review_comment_count,
        commit_comment_count: prs.commit_comment_count,
        milestone_count: snapshot.milestones.total_count,
        pr_count: snapshot.pull_requests.total_count,
        project_count: snapshot.projects_v2.total_count,
        branch_count: snapshot.branches.total_count,
        release_count: snapshot.releases.total_count,
        issue_count: snapshot.issues.total_count,
        issue_event_count,
        issue_comment_count,
        tag_count: snapshot.tags.total_count,
        discussion_count: snapshot.discussions.total_count,
        has_wiki: snapshot.has_wiki_enabled,
        full_url: snapshot.url.clone(),
        migration_issue: is_migration_risk(record_count, repo_size_mb),
        created: snapshot.created_at,
    }
}

/// Report file name for an organization: `<org-lowercased>-all_repos-YYYYMMDDHHMM_ts.csv`.
pub fn stats_file_name(org: &OrgName, now: DateTime<Utc>) -> String {
    format!(
        "{}-all_repos-{}_ts.csv",
        org.as_str().to_lowercase(),
        now.format("%Y%m%d%H%M")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::graphql::graphql_types::issue::IssueStatsConnection;
    use crate::github::graphql::graphql_types::pager::PageInfo;
    use crate::github::graphql::graphql_types::pull_request::PullRequestStatsConnection;
    use crate::github::graphql::graphql_types::repository::RepositoryOwner;
    use crate::github::graphql::graphql_types::CountConnection;
    use chrono::TimeZone;

    fn count(total_count: u64) -> CountConnection {
        CountConnection { total_count }
    }

    fn empty_page_info() -> PageInfo {
        PageInfo {
            has_next_page: false,
            end_cursor: None,
        }
    }

    fn snapshot_with_counts() -> RepositoryStatsNode {
        RepositoryStatsNode {
            name: "widgets".to_string(),
            owner: RepositoryOwner {
                login: "acme".to_string(),
            },
            is_empty: false,
            is_fork: false,
            is_archived: false,
            has_wiki_enabled: true,
            disk_usage: Some(2048),
            url: "https://github.com/acme/widgets".to_string(),
            created_at: Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap(),
            pushed_at: Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
            branches: count(4),
            tags: count(2),
            branch_protection_rules: count(1),
            collaborators: Some(count(7)),
            commit_comments: count(3),
            discussions: count(5),
            milestones: count(2),
            releases: count(6),
            projects_v2: count(1),
            issues: IssueStatsConnection {
                total_count: 10,
                nodes: Vec::new(),
                page_info: empty_page_info(),
            },
            pull_requests: PullRequestStatsConnection {
                total_count: 8,
                nodes: Vec::new(),
                page_info: empty_page_info(),
            },
        }
    }

    #[test]
    fn record_count_follows_the_doubled_pr_law() {
        let total = record_count(7, 1, 8, 2, 10, 11, 12, 20, 30, 6, 1);
        assert_eq!(total, 7 + 1 + 2 * 8 + 2 + 10 + 11 + 12 + 20 + 30 + 6 + 1);
    }

    #[test]
    fn record_count_accepts_negative_event_totals() {
        let total = record_count(0, 0, 0, 0, 0, 0, 0, 0, -2, 0, 0);
        assert_eq!(total, -2);
    }

    #[test]
    fn migration_risk_uses_an_inclusive_record_bound_and_an_exclusive_size_bound() {
        assert!(!is_migration_risk(59_999, 0));
        assert!(is_migration_risk(60_000, 0));
        assert!(!is_migration_risk(0, 1_500));
        assert!(is_migration_risk(0, 1_501));
    }

    #[test]
    fn repo_size_mb_is_the_floor_of_kilobytes() {
        let mut snapshot = snapshot_with_counts();
        snapshot.disk_usage = Some(1_048_575);
        let row = shape_row(
            &OrgName::from("acme"),
            &snapshot,
            &IssueAggregates::default(),
            &PullRequestAggregates::default(),
        );
        assert_eq!(row.repo_size_mb, 1_023);

        snapshot.disk_usage = Some(1_048_576);
        let row = shape_row(
            &OrgName::from("acme"),
            &snapshot,
            &IssueAggregates::default(),
            &PullRequestAggregates::default(),
        );
        assert_eq!(row.repo_size_mb, 1_024);
    }

    #[test]
    fn missing_disk_usage_defaults_to_zero() {
        let mut snapshot = snapshot_with_counts();
        snapshot.disk_usage = None;
        let row = shape_row(
            &OrgName::from("acme"),
            &snapshot,
            &IssueAggregates::default(),
            &PullRequestAggregates::default(),
        );
        assert_eq!(row.disk_size_kb, 0);
        assert_eq!(row.repo_size_mb, 0);
    }

    #[test]
    fn shaped_row_combines_issue_and_pr_contributions() {
        let snapshot = snapshot_with_counts();
        let issues = IssueAggregates {
            issue_count: 10,
            issue_comment_count: 120,
            issue_event_count: 180,
        };
        let prs = PullRequestAggregates {
            pull_request_count: 8,
            review_count: 9,
            review_comment_count: 11,
            commit_comment_count: 12,
            issue_event_count: -2,
            issue_comment_count: 4,
        };
        let row = shape_row(&OrgName::from("acme"), &snapshot, &issues, &prs);

        assert_eq!(row.issue_event_count, 178);
        assert_eq!(row.issue_comment_count, 124);
        assert_eq!(row.commit_comment_count, 12);
        assert_eq!(row.pr_review_count, 9);
        assert_eq!(
            row.record_count,
            record_count(7, 1, 8, 2, 10, 11, 12, 124, 178, 6, 1)
        );
        assert!(!row.migration_issue);
    }

    #[test]
    fn zero_count_repository_shapes_an_all_zero_row() {
        let mut snapshot = snapshot_with_counts();
        snapshot.branches = count(0);
        snapshot.tags = count(0);
        snapshot.branch_protection_rules = count(0);
        snapshot.collaborators = None;
        snapshot.commit_comments = count(0);
        snapshot.discussions = count(0);
        snapshot.milestones = count(0);
        snapshot.releases = count(0);
        snapshot.projects_v2 = count(0);
        snapshot.issues.total_count = 0;
        snapshot.pull_requests.total_count = 0;
        snapshot.disk_usage = Some(0);

        let row = shape_row(
            &OrgName::from("acme"),
            &snapshot,
            &IssueAggregates::default(),
            &PullRequestAggregates::default(),
        );
        assert_eq!(row.record_count, 0);
        assert!(!row.migration_issue);
    }

    #[test]
    fn stats_file_name_lowercases_the_org_and_stamps_the_minute() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 59).unwrap();
        assert_eq!(
            stats_file_name(&OrgName::from("Acme-Corp"), at),
            "acme-corp-all_repos-202403091405_ts.csv"
        );
    }
}
