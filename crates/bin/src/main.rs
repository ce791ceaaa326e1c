//! secq CLI binary.
//!
//! Fetch SEC EDGAR URLs through the cached, rate-limit aware client, keep
//! URLs warm, stress the queue and inspect the cache.

mod cache_path;
mod error;
mod logging;

use clap::{Args, Parser, Subcommand};
use error::CliError;
use indicatif::{ProgressBar, ProgressStyle};
use secq::config::DEFAULT_USER_AGENT;
use secq::{FetchOptions, Prefetcher, SecClient, StressConfig, edgar, stress};
use secq_cache::{CacheStore, SqliteStore};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "secq")]
#[command(about = "Cached, rate-limit aware client for the SEC EDGAR API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// SQLite cache location (default: platform cache dir)
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Keep the cache in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    /// User-Agent sent to SEC; include a contact address
    #[arg(long, global = true, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Concurrent requests
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Pause per worker between requests, in milliseconds
    #[arg(long, global = true)]
    delay_ms: Option<u64>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl GlobalArgs {
    fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(cache_path::default_cache_path)
    }

    fn client(&self) -> Result<SecClient, CliError> {
        let mut builder = SecClient::builder().user_agent(self.user_agent.clone());
        if let Some(concurrency) = self.concurrency {
            builder = builder.concurrency(concurrency);
        }
        if let Some(delay) = self.delay_ms {
            builder = builder.inter_request_delay(Duration::from_millis(delay));
        }
        if self.no_cache {
            debug!("persistent cache disabled");
        } else {
            let path = self.cache_path();
            debug!(path = %path.display(), "opening cache");
            builder = builder.sqlite_cache(path)?;
        }
        Ok(builder.build()?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one URL and print the body
    Fetch {
        /// URL to fetch
        url: String,

        /// Bypass the cache
        #[arg(long)]
        force: bool,

        /// Queue ahead of other work
        #[arg(long)]
        priority: bool,

        /// Maximum age of a cached response, in seconds
        #[arg(long, default_value = "300")]
        ttl_secs: u64,

        /// Refetch expired entries instead of serving them stale
        #[arg(long)]
        no_stale: bool,

        /// Pretty-print the body as JSON
        #[arg(long)]
        json: bool,
    },

    /// Issue many requests and report outcomes and latency
    Stress {
        /// URLs, requested round-robin
        #[arg(required = true)]
        urls: Vec<String>,

        /// Total requests
        #[arg(long, default_value = "20")]
        requests: usize,

        /// Requests in flight from the caller side
        #[arg(long, default_value = "8")]
        parallelism: usize,

        /// Allow cached responses instead of forcing network requests
        #[arg(long)]
        use_cache: bool,
    },

    /// Keep URLs fresh in the cache (default: the company ticker list)
    Warm {
        /// URLs to keep warm
        urls: Vec<String>,

        /// Run one pass and exit
        #[arg(long)]
        once: bool,

        /// Refetch entries older than this many minutes
        #[arg(long, default_value = "360")]
        max_age_mins: u64,

        /// Minutes between passes
        #[arg(long, default_value = "30")]
        interval_mins: u64,
    },

    /// Delete every cached response
    Clear,

    /// Show cache and throttle settings
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let global = &cli.global;
    match cli.command {
        Commands::Fetch {
            url,
            force,
            priority,
            ttl_secs,
            no_stale,
            json,
        } => {
            let options = FetchOptions::new()
                .force(force)
                .priority(priority)
                .cache_ttl(Duration::from_secs(ttl_secs))
                .stale_while_revalidate(!no_stale);
            fetch(global, &url, options, json).await
        }
        Commands::Stress {
            urls,
            requests,
            parallelism,
            use_cache,
        } => {
            let mut config = StressConfig::new(urls)
                .requests(requests)
                .parallelism(parallelism);
            if use_cache {
                config = config.options(FetchOptions::default());
            }
            run_stress(global, &config).await
        }
        Commands::Warm {
            urls,
            once,
            max_age_mins,
            interval_mins,
        } => {
            let urls = if urls.is_empty() {
                vec![edgar::company_tickers_url()]
            } else {
                urls
            };
            let client = global.client()?;
            let prefetcher = Prefetcher::new(client.clone(), urls)
                .max_age(Duration::from_secs(max_age_mins * 60))
                .interval(Duration::from_secs(interval_mins * 60));
            warm(&client, prefetcher, once).await
        }
        Commands::Clear => clear(global).await,
        Commands::Stats => stats(global).await,
    }
}

async fn fetch(
    global: &GlobalArgs,
    url: &str,
    options: FetchOptions,
    json: bool,
) -> Result<(), CliError> {
    let client = global.client()?;
    let response = client.fetch(url, options).await?;
    eprintln!(
        "HTTP {} ({:?}, fetched {})",
        response.status(),
        response.source(),
        response.fetched_at().format("%Y-%m-%d %H:%M:%S UTC")
    );

    let mut stdout = std::io::stdout().lock();
    if json && response.ok() {
        let value: serde_json::Value = response.json()?;
        let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        writeln!(stdout, "{pretty}")?;
    } else {
        writeln!(stdout, "{}", response.text())?;
    }
    client.flush().await;

    if response.ok() {
        Ok(())
    } else {
        warn!(url, status = response.status(), "non-success response");
        Err(CliError::Status {
            url: url.to_string(),
            status: response.status(),
        })
    }
}

async fn run_stress(global: &GlobalArgs, config: &StressConfig) -> Result<(), CliError> {
    let client = global.client()?;

    let pb = ProgressBar::new(config.requests as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Sending requests...");

    let report = stress::run_with(&client, config, |result| {
        pb.inc(1);
        match result {
            Ok(response) if !response.ok() => {
                pb.set_message(format!("last error: HTTP {}", response.status()));
            }
            Err(e) => pb.set_message(format!("last error: {e}")),
            Ok(_) => {}
        }
    })
    .await;
    pb.finish_with_message("Done");
    client.flush().await;

    let throttle = client.throttle_status();
    println!("{report}");
    println!(
        "  throttle: {:?} ({} recent rate limits)",
        throttle.mode, throttle.recent_rate_limits
    );
    Ok(())
}

async fn warm(client: &SecClient, prefetcher: Prefetcher, once: bool) -> Result<(), CliError> {
    if once {
        let report = prefetcher.run_once().await;
        client.flush().await;
        println!(
            "fresh: {}  refreshed: {}  failed: {}",
            report.fresh, report.refreshed, report.failed
        );
        return Ok(());
    }

    println!(
        "Keeping {} URL(s) warm, press Ctrl-C to stop",
        prefetcher.urls().len()
    );
    let handle = prefetcher.spawn();
    tokio::signal::ctrl_c().await?;
    debug!("interrupted, stopping prefetcher");
    handle.abort();
    client.flush().await;
    Ok(())
}

async fn clear(global: &GlobalArgs) -> Result<(), CliError> {
    if global.no_cache {
        println!("No persistent cache in use");
        return Ok(());
    }
    let path = global.cache_path();
    let store = SqliteStore::open(&path)?;
    let removed = store.count().await?;
    store.clear().await?;
    println!("Removed {removed} cached responses from {}", path.display());
    Ok(())
}

async fn stats(global: &GlobalArgs) -> Result<(), CliError> {
    let client = global.client()?;
    let tunables = client.tunables();
    let throttle = client.throttle_status();
    let policy = client.retry_policy();

    if global.no_cache {
        println!("Cache:        memory only");
    } else {
        println!("Cache:        {}", global.cache_path().display());
    }
    match client.cache().durable_len().await {
        Some(count) => println!("Entries:      {count}"),
        None => println!("Entries:      {}", client.cache().mirror_len()),
    }
    println!("User-Agent:   {}", global.user_agent);
    println!(
        "Concurrency:  {} (throttled {})",
        tunables.concurrency(),
        tunables.throttled_concurrency()
    );
    println!(
        "Delay:        {:?} (throttled {:?})",
        tunables.inter_request_delay(),
        tunables.throttled_delay()
    );
    println!(
        "Retries:      {} attempts, backoff {:?} to {:?}",
        policy.max_attempts, policy.initial_backoff, policy.max_backoff
    );
    println!("Throttle:     {:?}", throttle.mode);
    Ok(())
}
