use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use vetrina_client::ReqwestFetcher;
use vetrina_core::{
    CrawlConfig, CrawlService, IdentityPool, PlanLimits, ProductRecord, ProfileResolver,
};

#[derive(Parser)]
#[command(name = "vetrina", version, about = "Multi-source product catalog extractor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a catalog URL and export the deduplicated product set
    Extract {
        /// Target catalog URL
        #[arg(short, long)]
        url: String,

        /// Number of products to aim for
        #[arg(short, long, default_value_t = 1000)]
        target: usize,

        /// Hard cap from the calling plan
        #[arg(long, env = "VETRINA_MAX_PRODUCTS", default_value_t = 50_000)]
        max_products: usize,

        /// Export format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Wall-clock budget in seconds
        #[arg(long, env = "VETRINA_BUDGET_SECS", default_value_t = 600)]
        budget: u64,

        /// Ceiling on concurrent crawl workers
        #[arg(long, env = "VETRINA_MAX_WORKERS", default_value_t = 100)]
        max_workers: usize,

        /// Allow fetching private/reserved addresses (local testing only)
        #[arg(long, default_value_t = false)]
        allow_private: bool,
    },

    /// Show the crawl profile that would be used for a URL
    Profile {
        /// Target URL
        #[arg(short, long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vetrina=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            url,
            target,
            max_products,
            format,
            output,
            budget,
            max_workers,
            allow_private,
        } => {
            cmd_extract(
                &url,
                target,
                max_products,
                format,
                output.as_deref(),
                budget,
                max_workers,
                allow_private,
            )
            .await
        }
        Commands::Profile { url } => cmd_profile(&url),
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_extract(
    url: &str,
    target: usize,
    max_products: usize,
    format: OutputFormat,
    output: Option<&std::path::Path>,
    budget: u64,
    max_workers: usize,
    allow_private: bool,
) -> Result<()> {
    let mut fetcher = ReqwestFetcher::new().context("failed to create HTTP client")?;
    if allow_private {
        fetcher = fetcher.allow_private_urls();
    }

    let config = CrawlConfig::default()
        .with_wall_clock(Duration::from_secs(budget))
        .with_max_workers(max_workers);
    let service = CrawlService::new(
        fetcher,
        Arc::new(IdentityPool::default()),
        Arc::new(ProfileResolver::new()),
        config,
    );

    let outcome = service
        .extract(url, target, &PlanLimits::new(max_products))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        count = outcome.stats.count,
        fetched = outcome.stats.fetched,
        blocks = outcome.stats.blocks,
        identities = outcome.stats.identities_used,
        errors = outcome.stats.errors,
        truncated = outcome.truncated,
        "extraction finished in {:.1}s",
        outcome.stats.elapsed_seconds,
    );
    if outcome.truncated {
        tracing::warn!("wall-clock budget expired; result set is partial");
    }

    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    match format {
        OutputFormat::Json => write_json(writer, &outcome.products)?,
        OutputFormat::Csv => write_csv(writer, &outcome.products)?,
    }

    if let Some(path) = output {
        tracing::info!(path = %path.display(), products = outcome.products.len(), "export written");
    }
    Ok(())
}

fn write_json(mut writer: Box<dyn Write>, products: &[ProductRecord]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, products).context("failed to serialize products")?;
    writeln!(writer)?;
    Ok(())
}

fn write_csv(writer: Box<dyn Write>, products: &[ProductRecord]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for product in products {
        csv_writer
            .serialize(product)
            .context("failed to serialize product row")?;
    }
    csv_writer.flush().context("failed to flush CSV output")?;
    Ok(())
}

fn cmd_profile(url: &str) -> Result<()> {
    let resolver = ProfileResolver::new();
    let profile = resolver.resolve(url).map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(profile.as_ref())?);
    Ok(())
}
