//! The harvest engine
//!
//! Walks the organization cursor, fans out the per-repository issue and
//! pull-request aggregation, shapes and appends one row per repository, and
//! advances the durable state after every accepted row. One engine attempt is
//! wrapped by the retry envelope; on any fault the engine parks the cursor at
//! the last known-good position so the next attempt resumes safely.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::try_join;
use tracing::{debug, info, warn};

use crate::github::client::{
    GraphQLExecutor, OrgRepositoryPager, RepoIssuePager, RepoPullRequestPager,
};
use crate::github::graphql::graphql_types::issue::{IssueStatsConnection, IssueStatsNode};
use crate::github::graphql::graphql_types::pull_request::{
    PullRequestStatsConnection, PullRequestStatsNode,
};
use crate::output::CsvRowSink;
use crate::retry::{run_with_retry, shared_retry_state, RetryConfig, SharedRetryState};
use crate::services::rate_limit::{RateLimitDirective, RateLimitGovernor, RateLimitProber};
use crate::state::{HarvestState, LoadedState, StateStore, StateUpdate};
use crate::types::{
    shape_row, stats_file_name, IssueAggregates, OrgName, Owner, PullRequestAggregates,
    RepositoryName,
};

/// Commit contribution to a pull request's redundant-event estimate is capped
/// the way the timeline itself caps it.
const COMMIT_TIMELINE_CAP: u64 = 250;

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub org: OrgName,
    /// Repositories per organization page.
    pub page_size: u8,
    /// Issues/pull requests per sub-pagination page.
    pub extra_page_size: u8,
    /// Probe the API quota every this many written rows. Zero disables.
    pub rate_limit_check_interval: u64,
    pub resume_from_last_save: bool,
    /// Directory the report file is created in.
    pub output_dir: PathBuf,
}

impl HarvestConfig {
    pub fn new(org: OrgName) -> Self {
        Self {
            org,
            page_size: 10,
            extra_page_size: 50,
            rate_limit_check_interval: 60,
            resume_from_last_save: false,
            output_dir: PathBuf::from("."),
        }
    }
}

/// What one successful engine attempt accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub rows_emitted: u64,
    pub repos_skipped: u64,
    pub completed: bool,
}

pub struct HarvestEngine<'a, C> {
    client: &'a C,
    store: &'a StateStore,
    config: &'a HarvestConfig,
    retry_state: SharedRetryState,
    governor: Mutex<RateLimitGovernor>,
    /// Set once the first attempt has started. Re-entries after a fault must
    /// resume from durable state even when the caller did not ask to resume,
    /// or the retry envelope would duplicate already-emitted rows.
    attempted: AtomicBool,
}

impl<'a, C> HarvestEngine<'a, C>
where
    C: GraphQLExecutor + RateLimitProber,
{
    pub fn new(
        client: &'a C,
        store: &'a StateStore,
        config: &'a HarvestConfig,
        retry_state: SharedRetryState,
    ) -> Self {
        Self {
            client,
            store,
            config,
            retry_state,
            governor: Mutex::new(RateLimitGovernor::default()),
            attempted: AtomicBool::new(false),
        }
    }

    /// One engine attempt: load state, bind the sink, walk the organization.
    ///
    /// A completed prior run short-circuits into an empty summary. On error
    /// the cursor is reverted to the last successful one and persisted before
    /// the error propagates, so the retry envelope re-enters at a known-good
    /// position.
    pub async fn run(&self) -> Result<HarvestSummary> {
        let resume_requested =
            self.config.resume_from_last_save || self.attempted.swap(true, Ordering::SeqCst);
        let mut state = match self.store.load(resume_requested) {
            LoadedState::AlreadyCompleted(_) => {
                info!(
                    "Harvest of {} already completed, nothing to do",
                    self.config.org
                );
                return Ok(HarvestSummary {
                    completed: true,
                    ..Default::default()
                });
            }
            LoadedState::Resumed(state) | LoadedState::Fresh(state) => state,
        };

        let file_name = state
            .output_file_name
            .clone()
            .unwrap_or_else(|| stats_file_name(&self.config.org, Utc::now()));
        let report_path = self.config.output_dir.join(&file_name);
        let mut sink = CsvRowSink::create_or_append(&report_path)?;
        if state.output_file_name.as_deref() != Some(file_name.as_str()) {
            state.output_file_name = Some(file_name);
            self.store.persist(&state);
        }
        info!("Writing repository statistics to {}", report_path.display());

        match self.walk(&mut state, &mut sink).await {
            Ok(summary) => {
                info!(
                    "Harvest attempt finished: {} rows emitted, {} skipped, completed={}",
                    summary.rows_emitted, summary.repos_skipped, summary.completed
                );
                Ok(summary)
            }
            Err(error) => {
                state.current_cursor = state.last_successful_cursor.clone();
                self.store.persist(&state);
                Err(error)
            }
        }
    }

    async fn walk(&self, state: &mut HarvestState, sink: &mut CsvRowSink) -> Result<HarvestSummary> {
        let start_cursor = state
            .current_cursor
            .clone()
            .or_else(|| state.last_successful_cursor.clone());
        if let Some(cursor) = &start_cursor {
            info!("Reopening the organization walk at cursor {}", cursor);
        }

        let mut pager = OrgRepositoryPager::new(
            self.client,
            self.config.org.clone(),
            self.config.page_size,
            self.config.extra_page_size,
            start_cursor,
        );

        let mut summary = HarvestSummary::default();
        let mut rows_since_check = 0u64;

        while let Some(item) = pager.next().await? {
            if state.current_cursor != item.page_cursor {
                self.store.update(
                    state,
                    StateUpdate {
                        new_cursor: Some(item.page_cursor.clone()),
                        ..Default::default()
                    },
                );
            }

            let snapshot = item.snapshot;
            let repo_name = RepositoryName::from(snapshot.name.as_str());
            if state.processed_repos.contains(&repo_name) {
                debug!("Skipping already processed repository {}", repo_name);
                summary.repos_skipped += 1;
                continue;
            }

            let owner = Owner::from(snapshot.owner.login.as_str());
            let (issue_aggregates, pr_aggregates) = try_join!(
                aggregate_issues(
                    self.client,
                    &owner,
                    &repo_name,
                    self.config.extra_page_size,
                    &snapshot.issues,
                ),
                aggregate_pull_requests(
                    self.client,
                    &owner,
                    &repo_name,
                    self.config.extra_page_size,
                    &snapshot.pull_requests,
                ),
            )?;

            let row = shape_row(&self.config.org, &snapshot, &issue_aggregates, &pr_aggregates);
            sink.append(&row)
                .with_context(|| format!("Failed to append the row for {}", repo_name))?;

            self.store.update(
                state,
                StateUpdate {
                    repo_name: Some(repo_name.clone()),
                    last_successful_cursor: Some(state.current_cursor.clone()),
                    ..Default::default()
                },
            );
            self.retry_state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .record_success();

            summary.rows_emitted += 1;
            rows_since_check += 1;
            debug!("Emitted row {} for {}", summary.rows_emitted, repo_name);

            if self.config.rate_limit_check_interval > 0
                && rows_since_check >= self.config.rate_limit_check_interval
            {
                rows_since_check = 0;
                let probe = self.client.probe_rate_limits().await;
                let directive = self
                    .governor
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .assess(&probe)?;
                if directive == RateLimitDirective::Pause {
                    return Err(anyhow!(
                        "API quota exhausted, pausing before resuming the walk: {}",
                        probe.message
                    ));
                }
            }
        }

        // The walk drained: no further page, so the cursor goes null. That
        // null cursor is the completion signal a resumed run checks.
        if state.current_cursor.is_some() {
            self.store.update(
                state,
                StateUpdate {
                    new_cursor: Some(None),
                    ..Default::default()
                },
            );
        }
        state.completed_successfully = true;
        self.store.update(state, StateUpdate::default());
        summary.completed = true;

        Ok(summary)
    }
}

/// Harvests the organization, wrapping engine attempts in the retry envelope.
/// The retry budget is shared with the engine so every emitted row counts
/// toward the success threshold.
pub async fn harvest_org_stats<C>(
    client: &C,
    store: &StateStore,
    config: &HarvestConfig,
    retry_config: &RetryConfig,
) -> Result<HarvestSummary>
where
    C: GraphQLExecutor + RateLimitProber,
{
    let retry_state = shared_retry_state(retry_config.success_threshold);
    let engine = HarvestEngine::new(client, store, config, retry_state.clone());
    run_with_retry(retry_config, retry_state, None, || engine.run()).await
}

/// Folds a repository's issues into comment and event totals.
///
/// The embedded first page seeds the totals; sub-pagination continues from
/// the embedded end cursor and never re-fetches the first page.
pub async fn aggregate_issues<C: GraphQLExecutor>(
    client: &C,
    owner: &Owner,
    repo: &RepositoryName,
    page_size: u8,
    connection: &IssueStatsConnection,
) -> Result<IssueAggregates> {
    let mut aggregates = IssueAggregates {
        issue_count: connection.total_count,
        ..Default::default()
    };
    if connection.total_count == 0 {
        return Ok(aggregates);
    }

    let mut comments_sum = 0i64;
    let mut timeline_sum = 0i64;
    for node in &connection.nodes {
        comments_sum += node.comments.total_count as i64;
        timeline_sum += node.timeline_items.total_count as i64;
    }
    aggregates.issue_comment_count = comments_sum;
    aggregates.issue_event_count = timeline_sum - comments_sum;

    if connection.page_info.has_next_page {
        if let Some(end_cursor) = &connection.page_info.end_cursor {
            let mut pager = RepoIssuePager::new(
                client,
                owner.clone(),
                repo.clone(),
                page_size,
                Some(end_cursor.as_str().into()),
            );
            loop {
                let node = match pager.next().await {
                    Ok(Some(node)) => node,
                    Ok(None) => break,
                    Err(error) => {
                        warn!(
                            "Issue pagination failed for {}/{}, consider reducing the page size",
                            owner, repo
                        );
                        return Err(error);
                    }
                };
                fold_issue_node(&mut aggregates, &node);
            }
        }
    }

    Ok(aggregates)
}

fn fold_issue_node(aggregates: &mut IssueAggregates, node: &IssueStatsNode) {
    let comments = node.comments.total_count as i64;
    let timeline = node.timeline_items.total_count as i64;
    aggregates.issue_comment_count += comments;
    aggregates.issue_event_count += timeline - comments;
}

/// Folds a repository's pull requests into review, comment, commit, and
/// event totals.
pub async fn aggregate_pull_requests<C: GraphQLExecutor>(
    client: &C,
    owner: &Owner,
    repo: &RepositoryName,
    page_size: u8,
    connection: &PullRequestStatsConnection,
) -> Result<PullRequestAggregates> {
    let mut aggregates = PullRequestAggregates {
        pull_request_count: connection.total_count,
        ..Default::default()
    };
    if connection.total_count == 0 {
        return Ok(aggregates);
    }

    for node in &connection.nodes {
        fold_pull_request_node(&mut aggregates, node, owner, repo);
    }

    if connection.page_info.has_next_page {
        if let Some(end_cursor) = &connection.page_info.end_cursor {
            let mut pager = RepoPullRequestPager::new(
                client,
                owner.clone(),
                repo.clone(),
                page_size,
                Some(end_cursor.as_str().into()),
            );
            loop {
                let node = match pager.next().await {
                    Ok(Some(node)) => node,
                    Ok(None) => break,
                    Err(error) => {
                        warn!(
                            "Pull request pagination failed for {}/{}, consider reducing the page size",
                            owner, repo
                        );
                        return Err(error);
                    }
                };
                fold_pull_request_node(&mut aggregates, &node, owner, repo);
            }
        }
    }

    Ok(aggregates)
}

fn fold_pull_request_node(
    aggregates: &mut PullRequestAggregates,
    node: &PullRequestStatsNode,
    owner: &Owner,
    repo: &RepositoryName,
) {
    let comments = node.comments.total_count as i64;
    let commits = node.commits.total_count as i64;
    let timeline = node.timeline_items.total_count as i64;

    let redundant = comments + commits.min(COMMIT_TIMELINE_CAP as i64);
    if redundant > timeline {
        warn!(
            "Pull request #{} in {}/{} reports more redundant events ({}) than timeline events ({}): comments={}, commits={}",
            node.number, owner, repo, redundant, timeline, comments, commits
        );
    }
    // Negative deltas are preserved verbatim.
    aggregates.issue_event_count += timeline - redundant;
    aggregates.issue_comment_count += comments;
    aggregates.review_count += node.reviews.total_count;
    for review in &node.reviews.nodes {
        aggregates.review_comment_count += review.comments.total_count;
    }
    aggregates.commit_comment_count += node.commits.total_count;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::graphql::graphql_types::pager::PageInfo;
    use crate::github::graphql::graphql_types::{GraphQLPayload, GraphQLResponse};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::VecDeque;

    /// Serves pre-scripted sub-pagination pages; panics on any unexpected
    /// fetch so tests prove which queries run.
    struct ScriptedPages {
        issue_pages: Mutex<VecDeque<serde_json::Value>>,
        pull_request_pages: Mutex<VecDeque<serde_json::Value>>,
    }

    impl ScriptedPages {
        fn new(
            issue_pages: Vec<serde_json::Value>,
            pull_request_pages: Vec<serde_json::Value>,
        ) -> Self {
            Self {
                issue_pages: Mutex::new(issue_pages.into()),
                pull_request_pages: Mutex::new(pull_request_pages.into()),
            }
        }

        fn none() -> Self {
            Self::new(Vec::new(), Vec::new())
        }
    }

    impl GraphQLExecutor for ScriptedPages {
        async fn execute_graphql<T: Serialize, R: for<'de> Deserialize<'de>>(
            &self,
            query_name: &str,
            _payload: GraphQLPayload<T>,
        ) -> Result<GraphQLResponse<R>> {
            let page = match query_name {
                "repo_issues" => self.issue_pages.lock().unwrap().pop_front(),
                "repo_pull_requests" => self.pull_request_pages.lock().unwrap().pop_front(),
                other => panic!("unexpected query {}", other),
            };
            let page = page.unwrap_or_else(|| panic!("no scripted page left for {}", query_name));
            Ok(GraphQLResponse {
                data: Some(serde_json::from_value(page)?),
                errors: None,
            })
        }
    }

    fn issue_node_json(comments: u64, timeline: u64) -> serde_json::Value {
        json!({
            "comments": {"totalCount": comments},
            "timelineItems": {"totalCount": timeline},
        })
    }

    fn issues_page(
        total: u64,
        nodes: Vec<serde_json::Value>,
        next_cursor: Option<&str>,
    ) -> serde_json::Value {
        json!({
            "repository": {
                "issues": {
                    "totalCount": total,
                    "nodes": nodes,
                    "pageInfo": {"hasNextPage": next_cursor.is_some(), "endCursor": next_cursor},
                }
            }
        })
    }

    fn pr_node_json(
        number: u64,
        comments: u64,
        commits: u64,
        timeline: u64,
        reviews_total: u64,
        review_comment_counts: &[u64],
    ) -> serde_json::Value {
        json!({
            "number": number,
            "comments": {"totalCount": comments},
            "commits": {"totalCount": commits},
            "timelineItems": {"totalCount": timeline},
            "reviews": {
                "totalCount": reviews_total,
                "nodes": review_comment_counts
                    .iter()
                    .map(|count| json!({"comments": {"totalCount": count}}))
                    .collect::<Vec<_>>(),
            },
        })
    }

    fn embedded_issues(
        total: u64,
        nodes: Vec<serde_json::Value>,
        next_cursor: Option<&str>,
    ) -> IssueStatsConnection {
        serde_json::from_value(json!({
            "totalCount": total,
            "nodes": nodes,
            "pageInfo": {"hasNextPage": next_cursor.is_some(), "endCursor": next_cursor},
        }))
        .unwrap()
    }

    fn embedded_pull_requests(
        total: u64,
        nodes: Vec<serde_json::Value>,
        next_cursor: Option<&str>,
    ) -> PullRequestStatsConnection {
        serde_json::from_value(json!({
            "totalCount": total,
            "nodes": nodes,
            "pageInfo": {"hasNextPage": next_cursor.is_some(), "endCursor": next_cursor},
        }))
        .unwrap()
    }

    fn owner() -> Owner {
        Owner::from("acme")
    }

    fn repo() -> RepositoryName {
        RepositoryName::from("widgets")
    }

    #[tokio::test]
    async fn zero_issue_total_short_circuits_without_fetching() {
        let client = ScriptedPages::none();
        let connection = embedded_issues(0, Vec::new(), None);

        let aggregates = aggregate_issues(&client, &owner(), &repo(), 50, &connection)
            .await
            .unwrap();
        assert_eq!(aggregates, IssueAggregates::default());
    }

    #[tokio::test]
    async fn first_page_only_issues_need_no_sub_pagination() {
        let client = ScriptedPages::none();
        let connection = embedded_issues(
            2,
            vec![issue_node_json(3, 10), issue_node_json(1, 4)],
            None,
        );

        let aggregates = aggregate_issues(&client, &owner(), &repo(), 50, &connection)
            .await
            .unwrap();
        assert_eq!(aggregates.issue_count, 2);
        assert_eq!(aggregates.issue_comment_count, 4);
        assert_eq!(aggregates.issue_event_count, 10);
    }

    #[tokio::test]
    async fn issue_sub_pagination_continues_from_the_embedded_cursor() {
        // 150 issues at page size 50: the embedded page sums to
        // {comments: 120, timeline: 300}; two more pages add
        // {comments: 200, timeline: 500}.
        let client = ScriptedPages::new(
            vec![
                issues_page(150, vec![issue_node_json(80, 210)], Some("c2")),
                issues_page(150, vec![issue_node_json(120, 290)], None),
            ],
            Vec::new(),
        );
        let connection = embedded_issues(
            150,
            vec![issue_node_json(70, 180), issue_node_json(50, 120)],
            Some("c1"),
        );

        let aggregates = aggregate_issues(&client, &owner(), &repo(), 50, &connection)
            .await
            .unwrap();
        assert_eq!(aggregates.issue_count, 150);
        assert_eq!(aggregates.issue_comment_count, 320);
        assert_eq!(aggregates.issue_event_count, 480);
    }

    #[tokio::test]
    async fn issue_sub_pagination_failures_propagate() {
        struct FailingClient;
        impl GraphQLExecutor for FailingClient {
            async fn execute_graphql<T: Serialize, R: for<'de> Deserialize<'de>>(
                &self,
                _query_name: &str,
                _payload: GraphQLPayload<T>,
            ) -> Result<GraphQLResponse<R>> {
                Err(anyhow!("boom"))
            }
        }

        let connection = embedded_issues(60, vec![issue_node_json(1, 2)], Some("c1"));
        let result = aggregate_issues(&FailingClient, &owner(), &repo(), 50, &connection).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_pr_total_short_circuits_without_fetching() {
        let client = ScriptedPages::none();
        let connection = embedded_pull_requests(0, Vec::new(), None);

        let aggregates = aggregate_pull_requests(&client, &owner(), &repo(), 50, &connection)
            .await
            .unwrap();
        assert_eq!(aggregates, PullRequestAggregates::default());
    }

    #[tokio::test]
    async fn a_pr_with_more_redundant_than_timeline_events_goes_negative() {
        // timeline=5, comments=4, commits=3: redundant = 4 + 3 = 7 > 5, so
        // the event delta is 5 - 7 = -2, preserved verbatim.
        let client = ScriptedPages::none();
        let connection = embedded_pull_requests(
            1,
            vec![pr_node_json(17, 4, 3, 5, 1, &[2])],
            None,
        );

        let aggregates = aggregate_pull_requests(&client, &owner(), &repo(), 50, &connection)
            .await
            .unwrap();
        assert_eq!(aggregates.pull_request_count, 1);
        assert_eq!(aggregates.issue_event_count, -2);
        assert_eq!(aggregates.issue_comment_count, 4);
        assert_eq!(aggregates.review_count, 1);
        assert_eq!(aggregates.review_comment_count, 2);
        assert_eq!(aggregates.commit_comment_count, 3);
    }

    #[tokio::test]
    async fn commit_contribution_to_redundancy_caps_at_250_but_commit_total_does_not() {
        let client = ScriptedPages::none();
        let connection = embedded_pull_requests(
            1,
            vec![pr_node_json(9, 0, 300, 1_000, 0, &[])],
            None,
        );

        let aggregates = aggregate_pull_requests(&client, &owner(), &repo(), 50, &connection)
            .await
            .unwrap();
        assert_eq!(aggregates.issue_event_count, 750);
        assert_eq!(aggregates.commit_comment_count, 300);
    }

    #[tokio::test]
    async fn pr_sub_pagination_folds_every_page() {
        let client = ScriptedPages::new(
            Vec::new(),
            vec![json!({
                "repository": {
                    "pullRequests": {
                        "totalCount": 3,
                        "nodes": [pr_node_json(3, 1, 1, 10, 2, &[1, 4])],
                        "pageInfo": {"hasNextPage": false, "endCursor": null},
                    }
                }
            })],
        );
        let connection = embedded_pull_requests(
            3,
            vec![
                pr_node_json(1, 2, 1, 12, 1, &[3]),
                pr_node_json(2, 0, 1, 6, 0, &[]),
            ],
            Some("p1"),
        );

        let aggregates = aggregate_pull_requests(&client, &owner(), &repo(), 50, &connection)
            .await
            .unwrap();
        assert_eq!(aggregates.pull_request_count, 3);
        // (12 - 3) + (6 - 1) + (10 - 2)
        assert_eq!(aggregates.issue_event_count, 22);
        assert_eq!(aggregates.issue_comment_count, 3);
        assert_eq!(aggregates.review_count, 3);
        assert_eq!(aggregates.review_comment_count, 8);
        assert_eq!(aggregates.commit_comment_count, 3);
    }
}
