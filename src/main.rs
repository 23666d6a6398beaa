use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use feedrelay::config::Config;
use feedrelay::delivery::{DeliveryRetrier, LogTransport};
use feedrelay::fanout::BroadcastFanout;
use feedrelay::feed::{read_opml, HttpFeedFetcher};
use feedrelay::import::BulkImportCoordinator;
use feedrelay::poller::SourcePoller;
use feedrelay::preview::{EnrichmentPublisher, TelegraphClient, UnrenderClient};
use feedrelay::render::{JsonLocalizer, Localizer, MessageRenderer};
use feedrelay::service::SubscriptionService;
use feedrelay::storage::{Database, StorageError};

#[derive(Parser, Debug)]
#[command(
    name = "feedrelay",
    version,
    about = "Relays new RSS/Atom items to subscribers exactly once"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = "feedrelay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll sources until interrupted
    Run,
    /// Subscribe an owner to every feed of an OPML file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Subscriber id receiving the subscriptions
        #[arg(long)]
        owner: i64,
    },
    /// Re-enable a paused or failing source
    Resume {
        #[arg(value_name = "SOURCE_ID")]
        source_id: i64,
    },
    /// Stop polling a source
    Pause {
        #[arg(value_name = "SOURCE_ID")]
        source_id: i64,
    },
}

/// Everything the subcommands share.
struct Runtime {
    config: Config,
    db: Database,
    client: reqwest::Client,
    fetcher: Arc<HttpFeedFetcher>,
}

impl Runtime {
    async fn open(config_path: &Path) -> Result<Self> {
        let config = Config::load(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
            .with_env_overrides();
        tracing::debug!(?config, "Loaded configuration");

        let db = match Database::open(&config.database_path).await {
            Ok(db) => db,
            Err(StorageError::Locked) => {
                anyhow::bail!(
                    "Database {} is locked by another process",
                    config.database_path
                );
            }
            Err(e) => return Err(e).context("Failed to open database"),
        };

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client")?;
        let fetcher = Arc::new(HttpFeedFetcher::with_client(client.clone()));

        Ok(Self {
            config,
            db,
            client,
            fetcher,
        })
    }

    fn service(&self) -> SubscriptionService {
        let db = Arc::new(self.db.clone());
        SubscriptionService::new(
            db.clone(),
            db.clone(),
            db.clone(),
            db,
            self.fetcher.clone(),
            self.config.error_threshold,
        )
        .with_default_language(&self.config.default_language)
    }

    fn enrichment(&self) -> Result<Option<Arc<EnrichmentPublisher>>> {
        let tokens = self.config.telegraph_tokens();
        if !self.config.enable_telegraph || tokens.is_empty() {
            return Ok(None);
        }

        let mut publisher = EnrichmentPublisher::new(
            Arc::new(TelegraphClient::new(self.client.clone())),
            tokens,
            self.config.retry_policy(),
        )
        .with_author(
            &self.config.telegraph_author_name,
            &self.config.telegraph_author_url,
        );
        if let Some(url) = &self.config.unrender_url {
            let unrender =
                UnrenderClient::new(self.client.clone(), url, self.config.unrender_token())
                    .context("Invalid unrender_url")?;
            publisher = publisher.with_unrender(unrender);
        }
        Ok(Some(Arc::new(publisher)))
    }

    fn localizer(&self) -> Result<JsonLocalizer> {
        let localizer = JsonLocalizer::load(
            Path::new(&self.config.locale_dir),
            &self.config.default_language,
        )
        .context("Failed to load translations")?;
        tracing::info!(languages = ?localizer.available_languages(), "Loaded translations");
        Ok(localizer)
    }

    fn poller(&self) -> Result<SourcePoller> {
        let db = Arc::new(self.db.clone());
        let localizer = self.localizer()?;

        let fanout = BroadcastFanout::new(
            db.clone(),
            db.clone(),
            DeliveryRetrier::new(Arc::new(LogTransport), self.config.retry_policy()),
            MessageRenderer::new(Arc::new(localizer), self.config.message_mode),
            self.config.fanout(),
        );

        let mut poller = SourcePoller::new(
            db.clone(),
            db.clone(),
            db,
            self.fetcher.clone(),
            fanout,
            self.config.poller(),
        );
        if let Some(publisher) = self.enrichment()? {
            poller = poller.with_enrichment(publisher);
        }
        Ok(poller)
    }
}

/// Cancels `token` on Ctrl-C or SIGTERM.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("Shutdown requested");
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = Runtime::open(&args.config).await?;

    match args.command {
        Command::Run => {
            let poller = Arc::new(runtime.poller()?);
            let shutdown = CancellationToken::new();
            spawn_shutdown_listener(shutdown.clone());
            poller.run(shutdown).await;
        }
        Command::Import { file, owner } => {
            let outlines = read_opml(&file)
                .await
                .with_context(|| format!("Failed to read OPML file {}", file.display()))?;
            if outlines.is_empty() {
                eprintln!("Warning: no valid feeds found in {}", file.display());
                return Ok(());
            }

            let coordinator = BulkImportCoordinator::new(Arc::new(runtime.service()));
            let report = coordinator.import_all(outlines, owner).await;

            let succeeded = report.succeeded.len().to_string();
            let failed = report.failed.len().to_string();
            println!(
                "{}",
                runtime.localizer()?.localize(
                    &runtime.config.default_language,
                    "import_summary_format",
                    &[&succeeded, &failed],
                )
            );
            for (outline, error) in &report.failed {
                println!("  {} ({}): {}", outline.text, outline.xml_url, error);
            }
        }
        Command::Resume { source_id } => {
            runtime
                .service()
                .resume_source(source_id)
                .await
                .with_context(|| format!("Failed to resume source {source_id}"))?;
            println!("Source {source_id} resumed");
        }
        Command::Pause { source_id } => {
            runtime
                .service()
                .pause_source(source_id)
                .await
                .with_context(|| format!("Failed to pause source {source_id}"))?;
            println!("Source {source_id} paused");
        }
    }

    Ok(())
}
