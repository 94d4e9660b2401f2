use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use github_org_stats::github::GitHubClient;
use github_org_stats::retry::RetryConfig;
use github_org_stats::services::audit::audit_missing_repos;
use github_org_stats::services::harvest::{harvest_org_stats, HarvestConfig};
use github_org_stats::state::StateStore;
use github_org_stats::types::OrgName;

#[derive(Parser)]
#[command(name = "github-org-stats")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Collects per-repository statistics for every repository of a GitHub organization into a CSV report, with resumable, rate-aware pagination"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand: authentication, endpoint, logging.
/// Each option also reads the matching environment variable.
#[derive(Args, Clone)]
struct ConnectionArgs {
    /// Personal access token used for API calls
    #[arg(long, env = "ACCESS_TOKEN")]
    access_token: Option<String>,
    /// GitHub App id, used with a private key to mint an installation token
    #[arg(long, env = "APP_ID")]
    app_id: Option<u64>,
    /// GitHub App private key in PEM form
    #[arg(long, env = "PRIVATE_KEY")]
    private_key: Option<String>,
    /// Path to a file containing the GitHub App private key
    #[arg(long, env = "PRIVATE_KEY_FILE")]
    private_key_file: Option<PathBuf>,
    /// Installation id of the GitHub App within the organization
    #[arg(long, env = "APP_INSTALLATION_ID")]
    app_installation_id: Option<u64>,
    /// API base URL, e.g. a GitHub Enterprise Server endpoint
    #[arg(long, env = "BASE_URL", default_value = "https://api.github.com")]
    base_url: String,
    /// Proxy URL exported as HTTPS_PROXY/HTTP_PROXY for this process and its
    /// children
    #[arg(long, env = "PROXY_URL")]
    proxy_url: Option<String>,
    /// Log at debug level instead of info
    #[arg(long, env = "VERBOSE")]
    verbose: bool,
    /// Repositories fetched per page
    #[arg(long, env = "PAGE_SIZE", default_value_t = 10)]
    page_size: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest per-repository statistics for every repository of an
    /// organization
    RepoStats {
        /// Organization to harvest
        #[arg(long, env = "ORG_NAME")]
        org_name: String,
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Issues and pull requests fetched per sub-pagination page
        #[arg(long, env = "EXTRA_PAGE_SIZE", default_value_t = 50)]
        extra_page_size: u8,
        /// Probe the API quota every N written rows
        #[arg(long, env = "RATE_LIMIT_CHECK_INTERVAL", default_value_t = 60)]
        rate_limit_check_interval: u64,
        /// Attempts before the harvest gives up
        #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value_t = 3)]
        retry_max_attempts: u32,
        /// Initial retry delay in milliseconds
        #[arg(long, env = "RETRY_INITIAL_DELAY", default_value_t = 1_000)]
        retry_initial_delay: u64,
        /// Upper bound for a single retry delay in milliseconds
        #[arg(long, env = "RETRY_MAX_DELAY", default_value_t = 30_000)]
        retry_max_delay: u64,
        /// Multiplier applied to the delay per retry
        #[arg(long, env = "RETRY_BACKOFF_FACTOR", default_value_t = 2.0)]
        retry_backoff_factor: f64,
        /// Consecutive successful rows that reset the retry budget
        #[arg(long, env = "RETRY_SUCCESS_THRESHOLD", default_value_t = 5)]
        retry_success_threshold: u32,
        /// Resume from last_known_state.json instead of starting over
        #[arg(long, env = "RESUME_FROM_LAST_SAVE")]
        resume_from_last_save: bool,
    },
    /// Diff the organization's live repository list against an existing
    /// report and list what the report is missing
    MissingRepos {
        /// Organization to compare against
        #[arg(long, env = "ORG_NAME")]
        org_name: String,
        /// Previously generated stats report
        #[arg(long, env = "OUTPUT_FILE_NAME")]
        output_file_name: PathBuf,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install the rustls crypto provider before any TLS connection is made
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();

    match cli.command {
        Commands::RepoStats {
            org_name,
            connection,
            extra_page_size,
            rate_limit_check_interval,
            retry_max_attempts,
            retry_initial_delay,
            retry_max_delay,
            retry_backoff_factor,
            retry_success_threshold,
            resume_from_last_save,
        } => {
            init_logging(&org_name, connection.verbose);
            let org = OrgName::from(org_name);
            let client = build_client(&connection).await?;
            let store = StateStore::at_default_location();

            let harvest_config = HarvestConfig {
                org: org.clone(),
                page_size: connection.page_size,
                extra_page_size,
                rate_limit_check_interval,
                resume_from_last_save,
                output_dir: PathBuf::from("."),
            };
            let retry_config = RetryConfig {
                max_attempts: retry_max_attempts,
                initial_delay: Duration::from_millis(retry_initial_delay),
                max_delay: Duration::from_millis(retry_max_delay),
                backoff_factor: retry_backoff_factor,
                success_threshold: retry_success_threshold,
            };

            let summary =
                harvest_org_stats(&client, &store, &harvest_config, &retry_config).await?;
            info!(
                "Harvest of {} finished: {} rows emitted, {} skipped, completed={}",
                org, summary.rows_emitted, summary.repos_skipped, summary.completed
            );
        }
        Commands::MissingRepos {
            org_name,
            output_file_name,
            connection,
        } => {
            init_logging(&org_name, connection.verbose);
            let org = OrgName::from(org_name);
            let client = build_client(&connection).await?;

            let missing =
                audit_missing_repos(&client, &org, &output_file_name, connection.page_size)
                    .await?;
            if missing.is_empty() {
                println!("The report covers every repository of {}", org);
            } else {
                println!("{} repositories are missing from the report:", missing.len());
                for name in missing {
                    println!("{}", name);
                }
            }
        }
    }

    Ok(())
}

/// Console logging on stderr plus a dated append-mode log file under logs/.
/// The file layer is best effort; losing it never blocks the run.
fn init_logging(org: &str, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match open_log_file(org) {
        Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file))),
        Err(io_error) => {
            eprintln!("Continuing without a log file: {}", io_error);
            None
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

fn open_log_file(org: &str) -> std::io::Result<std::fs::File> {
    fs::create_dir_all("logs")?;
    let path = format!("logs/{}-repo-stats-{}.log", org, Utc::now().format("%Y-%m-%d"));
    OpenOptions::new().create(true).append(true).open(path)
}

/// Resolves authentication (token or App installation) and builds the client.
async fn build_client(connection: &ConnectionArgs) -> Result<GitHubClient> {
    if let Some(proxy_url) = &connection.proxy_url {
        // Exported process-wide so spawned children inherit it.
        std::env::set_var("HTTPS_PROXY", proxy_url);
        std::env::set_var("HTTP_PROXY", proxy_url);
    }

    let base_url = Some(connection.base_url.as_str());

    if let Some(token) = &connection.access_token {
        return GitHubClient::new(Some(token.clone()), base_url, None);
    }

    match (connection.app_id, connection.app_installation_id) {
        (Some(app_id), Some(installation_id)) => {
            let private_key_pem = match (&connection.private_key, &connection.private_key_file) {
                (Some(key), _) => key.clone(),
                (None, Some(path)) => fs::read_to_string(path).with_context(|| {
                    format!("Failed to read the private key file {}", path.display())
                })?,
                (None, None) => {
                    bail!("--app-id requires --private-key or --private-key-file")
                }
            };
            GitHubClient::with_app_auth(app_id, &private_key_pem, installation_id, base_url, None)
                .await
        }
        _ => bail!(
            "authentication requires --access-token, or --app-id together with --app-installation-id and a private key"
        ),
    }
}
