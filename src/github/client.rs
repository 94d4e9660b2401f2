use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::EncodingKey;
use octocrab::models::{AppId, InstallationToken};
use octocrab::Octocrab;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::github::error::ApiRetryableError;
use crate::github::graphql::error::classify_graphql_error;
use crate::github::graphql::graphql_types::issue::{IssueStatsNode, RepoIssuesResponse};
use crate::github::graphql::graphql_types::pull_request::{
    PullRequestStatsNode, RepoPullRequestsResponse,
};
use crate::github::graphql::graphql_types::repository::{
    OrgRepositoriesResponse, RepositoryStatsNode,
};
use crate::github::graphql::graphql_types::{GraphQLPayload, GraphQLQuery, GraphQLResponse};
use crate::github::graphql::issue::{repo_issues_query, RepoIssuesVariable};
use crate::github::graphql::org::{org_repositories_query, OrgRepositoriesVariable};
use crate::github::graphql::pull_request::{repo_pull_requests_query, RepoPullRequestsVariable};
use crate::types::{OrgName, Owner, PageCursor, RepositoryName};

/// Maximum number of transport-level retry attempts per GraphQL request.
/// Distinct from the harvest-level retry envelope.
pub const DEFAULT_TRANSPORT_RETRY_COUNT: u32 = 5;

/// Hard ceiling on a single GraphQL round trip.
const GRAPHQL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Installation token minted once per process; child processes spawned by a
/// sink read it from here instead of re-running the exchange.
static INSTALLATION_TOKEN: OnceCell<String> = OnceCell::new();

pub trait GraphQLExecutor {
    #[allow(async_fn_in_trait)]
    async fn execute_graphql<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        query_name: &str,
        payload: GraphQLPayload<T>,
    ) -> Result<GraphQLResponse<R>>;
}

#[derive(Clone)]
pub struct GitHubClient {
    pub(crate) client: Octocrab,
}

impl GitHubClient {
    pub fn new(
        token: Option<String>,
        base_url: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = Octocrab::builder();

        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        if let Some(base_url) = base_url {
            builder = builder
                .base_uri(base_url)
                .with_context(|| format!("Invalid base URL: {}", base_url))?;
        }

        let read_write_timeout = timeout.unwrap_or_else(|| Duration::from_secs(30));
        let connect_timeout = read_write_timeout.min(Duration::from_secs(10));
        builder = builder
            .set_connect_timeout(Some(connect_timeout))
            .set_read_timeout(Some(read_write_timeout))
            .set_write_timeout(Some(read_write_timeout));

        let client = builder.build().context("Failed to build GitHub client")?;

        Ok(Self { client })
    }

    /// Builds a client authenticated through a GitHub App installation.
    pub async fn with_app_auth(
        app_id: u64,
        private_key_pem: &str,
        installation_id: u64,
        base_url: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let token =
            mint_installation_token(app_id, private_key_pem, installation_id, base_url).await?;
        Self::new(Some(token), base_url, timeout)
    }

    /// Lists the organization's repository names through the lightweight REST
    /// listing. Used by the missing-repo audit; the harvest itself walks the
    /// GraphQL surface.
    pub async fn list_repository_names(
        &self,
        org: &OrgName,
        per_page: u8,
    ) -> Result<Vec<String>> {
        let first_page = self
            .client
            .orgs(org.as_str())
            .list_repos()
            .per_page(per_page)
            .send()
            .await
            .map_err(|error| anyhow!(ApiRetryableError::from_octocrab_error(error)))
            .with_context(|| format!("Failed to list repositories of {}", org))?;

        let repos = self
            .client
            .all_pages(first_page)
            .await
            .map_err(|error| anyhow!(ApiRetryableError::from_octocrab_error(error)))
            .with_context(|| format!("Failed to page through the repositories of {}", org))?;

        Ok(repos.into_iter().map(|repo| repo.name).collect())
    }
}

/// Exchanges GitHub App credentials for an installation token.
///
/// The minted token is cached process-wide; subsequent calls return the
/// cached value without touching the API again.
pub async fn mint_installation_token(
    app_id: u64,
    private_key_pem: &str,
    installation_id: u64,
    base_url: Option<&str>,
) -> Result<String> {
    if let Some(token) = INSTALLATION_TOKEN.get() {
        return Ok(token.clone());
    }

    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .context("Failed to parse the GitHub App private key")?;

    let mut builder = Octocrab::builder().app(AppId(app_id), key);
    if let Some(base_url) = base_url {
        builder = builder
            .base_uri(base_url)
            .with_context(|| format!("Invalid base URL: {}", base_url))?;
    }
    let app_client = builder
        .build()
        .context("Failed to build the GitHub App client")?;

    let minted: InstallationToken = app_client
        .post(
            format!("/app/installations/{}/access_tokens", installation_id),
            None::<&()>,
        )
        .await
        .map_err(|error| anyhow!(ApiRetryableError::from_octocrab_error(error)))
        .with_context(|| {
            format!(
                "Failed to mint an installation token for app {} installation {}",
                app_id, installation_id
            )
        })?;

    info!(
        "Minted an installation token for app {} installation {}",
        app_id, installation_id
    );
    let _ = INSTALLATION_TOKEN.set(minted.token.clone());

    Ok(minted.token)
}

impl GraphQLExecutor for GitHubClient {
    async fn execute_graphql<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        query_name: &str,
        payload: GraphQLPayload<T>,
    ) -> Result<GraphQLResponse<R>> {
        let response = retry_with_backoff(query_name, DEFAULT_TRANSPORT_RETRY_COUNT, || async {
            debug!("Executing GraphQL query {}", query_name);
            let started = std::time::Instant::now();

            let response: GraphQLResponse<R> =
                tokio::time::timeout(GRAPHQL_REQUEST_TIMEOUT, self.client.graphql(&payload))
                    .await
                    .map_err(|_| {
                        ApiRetryableError::Retryable(format!(
                            "GraphQL request timed out after {:?}",
                            GRAPHQL_REQUEST_TIMEOUT
                        ))
                    })?
                    .map_err(ApiRetryableError::from_octocrab_error)?;

            debug!(
                "GraphQL query {} completed in {:?}",
                query_name,
                started.elapsed()
            );

            if let Some(errors) = &response.errors {
                if !errors.is_empty() {
                    let message = errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(classify_graphql_error(&message));
                }
            }

            Ok(response)
        })
        .await?;

        Ok(response)
    }
}

/// Transport-level retry loop for a single remote operation.
///
/// Rate-limit signals back off from a higher base than plain transient
/// failures. This loop bounds a single request; the harvest-level envelope in
/// `crate::retry` bounds whole engine attempts.
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    max_retries: u32,
    execute_operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, ApiRetryableError>>,
{
    let mut attempt = 0u32;

    loop {
        match execute_operation().await {
            Ok(result) => return Ok(result),
            Err(ApiRetryableError::NonRetryable(message)) => {
                warn!(
                    "{} failed with a non-retryable error: {}",
                    operation_name, message
                );
                return Err(anyhow!(ApiRetryableError::NonRetryable(message)));
            }
            Err(error) => {
                if attempt >= max_retries {
                    warn!(
                        "{} exhausted {} transport retries: {}",
                        operation_name, attempt, error
                    );
                    return Err(anyhow!(error));
                }
                attempt += 1;
                let base_millis = match error {
                    ApiRetryableError::RateLimit => 1_000u64,
                    _ => 500,
                };
                let delay = Duration::from_millis(
                    base_millis.saturating_mul(2u64.saturating_pow(attempt - 1)),
                );
                warn!(
                    "{} failed on attempt {}/{} ({}), backing off for {:?}",
                    operation_name, attempt, max_retries, error, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// One yield of the organization walk: a repository snapshot plus the cursor
/// that advanced to its page (`None` for the first page).
///
/// Recording this cursor per row means a resumed run re-fetches the page that
/// was being processed when the run died and skips the rows already emitted,
/// instead of losing the remainder of that page.
#[derive(Debug, Clone)]
pub struct OrgRepositoryItem {
    pub snapshot: RepositoryStatsNode,
    pub page_cursor: Option<PageCursor>,
}

/// Pull-based pager over an organization's repositories, ordered by name
/// ascending. Finite and non-restartable: once drained it keeps returning
/// `None`.
pub struct OrgRepositoryPager<'a, C> {
    client: &'a C,
    org: OrgName,
    page_size: u8,
    extra_page_size: u8,
    next_cursor: Option<PageCursor>,
    page_cursor: Option<PageCursor>,
    buffer: VecDeque<RepositoryStatsNode>,
    exhausted: bool,
}

impl<'a, C: GraphQLExecutor> OrgRepositoryPager<'a, C> {
    pub fn new(
        client: &'a C,
        org: OrgName,
        page_size: u8,
        extra_page_size: u8,
        resume_cursor: Option<PageCursor>,
    ) -> Self {
        Self {
            client,
            org,
            page_size,
            extra_page_size,
            next_cursor: resume_cursor,
            page_cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Yields the next repository snapshot, advancing one remote page at a
    /// time.
    pub async fn next(&mut self) -> Result<Option<OrgRepositoryItem>> {
        loop {
            if let Some(snapshot) = self.buffer.pop_front() {
                return Ok(Some(OrgRepositoryItem {
                    snapshot,
                    page_cursor: self.page_cursor.clone(),
                }));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let fetch_cursor = self.next_cursor.clone();
        let payload = GraphQLPayload {
            query: GraphQLQuery(org_repositories_query(self.extra_page_size)),
            variables: Some(OrgRepositoriesVariable {
                login: self.org.clone(),
                page_size: self.page_size,
                cursor: fetch_cursor.clone(),
            }),
        };

        let response: GraphQLResponse<OrgRepositoriesResponse> = self
            .client
            .execute_graphql("org_repositories", payload)
            .await?;

        let data = response
            .data
            .ok_or_else(|| anyhow!("No data in GraphQL organization repositories response"))?;
        let organization = data.organization.ok_or_else(|| {
            anyhow!(ApiRetryableError::NonRetryable(format!(
                "Organization not found: {}",
                self.org
            )))
        })?;

        let connection = organization.repositories;
        // The buffered nodes carry the cursor that fetched their page.
        self.page_cursor = fetch_cursor;
        match (
            connection.page_info.has_next_page,
            connection.page_info.end_cursor.clone(),
        ) {
            (true, Some(cursor)) => self.next_cursor = Some(PageCursor(cursor)),
            (true, None) => {
                warn!(
                    "Repository page of {} reports another page but no end cursor, stopping the walk",
                    self.org
                );
                self.exhausted = true;
            }
            (false, _) => self.exhausted = true,
        }

        debug!(
            "Fetched {} repositories of {} (page cursor: {:?})",
            connection.nodes.len(),
            self.org,
            self.page_cursor
        );
        self.buffer.extend(connection.nodes);

        Ok(())
    }
}

/// Pull-based pager over a repository's issues, starting at the cursor
/// embedded in the parent snapshot's first page. The first page itself is
/// never re-fetched.
pub struct RepoIssuePager<'a, C> {
    client: &'a C,
    owner: Owner,
    repository_name: RepositoryName,
    page_size: u8,
    next_cursor: Option<PageCursor>,
    buffer: VecDeque<IssueStatsNode>,
    exhausted: bool,
}

impl<'a, C: GraphQLExecutor> RepoIssuePager<'a, C> {
    pub fn new(
        client: &'a C,
        owner: Owner,
        repository_name: RepositoryName,
        page_size: u8,
        start_cursor: Option<PageCursor>,
    ) -> Self {
        Self {
            client,
            owner,
            repository_name,
            page_size,
            next_cursor: start_cursor,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<IssueStatsNode>> {
        loop {
            if let Some(node) = self.buffer.pop_front() {
                return Ok(Some(node));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let payload = GraphQLPayload {
            query: GraphQLQuery(repo_issues_query()),
            variables: Some(RepoIssuesVariable {
                owner: self.owner.clone(),
                repository_name: self.repository_name.clone(),
                page_size: self.page_size,
                cursor: self.next_cursor.clone(),
            }),
        };

        let response: GraphQLResponse<RepoIssuesResponse> =
            self.client.execute_graphql("repo_issues", payload).await?;

        let data = response
            .data
            .ok_or_else(|| anyhow!("No data in GraphQL repository issues response"))?;
        let repository = data.repository.ok_or_else(|| {
            anyhow!(ApiRetryableError::NonRetryable(format!(
                "Repository not found: {}/{}",
                self.owner, self.repository_name
            )))
        })?;

        let connection = repository.issues;
        match (
            connection.page_info.has_next_page,
            connection.page_info.end_cursor.clone(),
        ) {
            (true, Some(cursor)) => self.next_cursor = Some(PageCursor(cursor)),
            _ => self.exhausted = true,
        }
        self.buffer.extend(connection.nodes);

        Ok(())
    }
}

/// Pull-based pager over a repository's pull requests; same cursor semantics
/// as the issue pager.
pub struct RepoPullRequestPager<'a, C> {
    client: &'a C,
    owner: Owner,
    repository_name: RepositoryName,
    page_size: u8,
    next_cursor: Option<PageCursor>,
    buffer: VecDeque<PullRequestStatsNode>,
    exhausted: bool,
}

impl<'a, C: GraphQLExecutor> RepoPullRequestPager<'a, C> {
    pub fn new(
        client: &'a C,
        owner: Owner,
        repository_name: RepositoryName,
        page_size: u8,
        start_cursor: Option<PageCursor>,
    ) -> Self {
        Self {
            client,
            owner,
            repository_name,
            page_size,
            next_cursor: start_cursor,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<PullRequestStatsNode>> {
        loop {
            if let Some(node) = self.buffer.pop_front() {
                return Ok(Some(node));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let payload = GraphQLPayload {
            query: GraphQLQuery(repo_pull_requests_query()),
            variables: Some(RepoPullRequestsVariable {
                owner: self.owner.clone(),
                repository_name: self.repository_name.clone(),
                page_size: self.page_size,
                cursor: self.next_cursor.clone(),
            }),
        };

        let response: GraphQLResponse<RepoPullRequestsResponse> = self
            .client
            .execute_graphql("repo_pull_requests", payload)
            .await?;

        let data = response
            .data
            .ok_or_else(|| anyhow!("No data in GraphQL repository pull requests response"))?;
        let repository = data.repository.ok_or_else(|| {
            anyhow!(ApiRetryableError::NonRetryable(format!(
                "Repository not found: {}/{}",
                self.owner, self.repository_name
            )))
        })?;

        let connection = repository.pull_requests;
        match (
            connection.page_info.has_next_page,
            connection.page_info.end_cursor.clone(),
        ) {
            (true, Some(cursor)) => self.next_cursor = Some(PageCursor(cursor)),
            _ => self.exhausted = true,
        }
        self.buffer.extend(connection.nodes);

        Ok(())
    }
}
