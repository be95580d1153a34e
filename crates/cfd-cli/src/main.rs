use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use cfd_catalog::{load_catalog, source_from_config, CatalogConfig, CatalogSnapshot, CatalogState};
use cfd_core::{CampaignStatus, Category, FundingRange, SortDirection, SortKey, SortState};
use cfd_discovery::{compute_view, facet_counts, DiscoveryConfig, Window};
use cfd_web::{AppState, CampaignCard};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "cfd")]
#[command(about = "Crowdfunding campaign discovery")]
struct Cli {
    /// Read the catalog from a local JSON file.
    #[arg(long, global = true, conflicts_with = "catalog_url")]
    catalog: Option<PathBuf>,
    /// Fetch the catalog over HTTP, falling back to the local cache.
    #[arg(long, global = true)]
    catalog_url: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Filter, rank and page through campaigns.
    Discover(DiscoverArgs),
    /// Per-category and per-status campaign counts.
    Facets,
    /// Serve the JSON API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Args, Default)]
struct DiscoverArgs {
    #[arg(long = "category", value_delimiter = ',')]
    categories: Vec<Category>,
    #[arg(long = "status", value_delimiter = ',')]
    statuses: Vec<CampaignStatus>,
    #[arg(long)]
    min_goal: Option<f64>,
    #[arg(long)]
    max_goal: Option<f64>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long, short = 'q')]
    query: Option<String>,
    #[arg(long, value_parser = parse_sort_key)]
    sort: Option<SortKey>,
    #[arg(long)]
    direction: Option<SortDirection>,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long)]
    page_size: Option<usize>,
    #[arg(long)]
    json: bool,
}

fn parse_sort_key(raw: &str) -> Result<SortKey, String> {
    let key = SortKey::parse(raw);
    if key == SortKey::Unsorted && !raw.trim().eq_ignore_ascii_case("unsorted") {
        warn!(sort = raw, "unrecognized sort key; keeping catalog order");
    }
    Ok(key)
}

fn init_tracing() {
    let env = std::env::var("CFD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut catalog_config = CatalogConfig::from_env();
    if let Some(path) = cli.catalog {
        catalog_config.catalog_path = Some(path);
        catalog_config.catalog_url = None;
    }
    if let Some(url) = cli.catalog_url {
        catalog_config.catalog_url = Some(url);
    }
    let workspace_root = std::env::current_dir().context("resolving working directory")?;
    let config = DiscoveryConfig::load(&workspace_root)?;

    let source = source_from_config(&catalog_config)?;
    let state = load_catalog(source.as_ref()).await;

    match cli.command.unwrap_or(Commands::Discover(DiscoverArgs::default())) {
        Commands::Discover(args) => discover(ready(&state)?, &config, args)?,
        Commands::Facets => {
            let snapshot = ready(&state)?;
            let facets = facet_counts(&snapshot.campaigns, &config.default_filters());
            println!("{}", serde_json::to_string_pretty(&facets)?);
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(cfd_web::port_from_env);
            if let Some(snapshot) = state.snapshot() {
                info!(campaigns = snapshot.len(), stale = snapshot.stale, "serving catalog");
            }
            cfd_web::serve(AppState::new(state, config), port).await?;
        }
    }

    Ok(())
}

fn ready(state: &CatalogState) -> Result<&CatalogSnapshot> {
    match state {
        CatalogState::Ready(snapshot) => Ok(snapshot),
        CatalogState::Empty { source_id } => bail!("catalog {source_id} has no campaigns"),
        CatalogState::Failed { source_id, reason } => {
            bail!("catalog {source_id} failed to load: {reason}")
        }
    }
}

fn discover(snapshot: &CatalogSnapshot, config: &DiscoveryConfig, args: DiscoverArgs) -> Result<()> {
    let mut filters = config.default_filters();
    filters.categories.extend(args.categories);
    filters.statuses.extend(args.statuses);
    if args.min_goal.is_some() || args.max_goal.is_some() {
        let defaults = filters.default_range;
        filters.funding_range = FundingRange::new(
            args.min_goal.unwrap_or(defaults.min()),
            args.max_goal.unwrap_or(defaults.max()),
        )?;
    }
    if let Some(location) = args.location {
        filters.location = location;
    }
    if let Some(query) = args.query {
        filters.search_query = query;
    }

    let mut sort = SortState::by(args.sort.unwrap_or(config.default_sort));
    if let Some(direction) = args.direction {
        sort.direction = direction;
    }
    let window = Window::new(args.page_size.unwrap_or_else(|| config.page_size()), args.page);

    let now = Utc::now();
    let view = compute_view(&snapshot.campaigns, &filters, sort, window, now);
    let cards = view
        .displayed
        .iter()
        .map(|c| CampaignCard::from_campaign(c, now))
        .collect::<Vec<_>>();

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "campaigns": cards,
                "has_more": view.has_more,
                "total_matched": view.total_matched,
                "active_filter_count": view.active_filter_count,
                "page": view.page,
                "page_size": view.page_size,
            }))?
        );
        return Ok(());
    }

    for card in &cards {
        println!(
            "{:<10} {:<16} {:>6.1}% {:>4}d  {}",
            card.id,
            card.category.as_str(),
            card.percent_funded,
            card.days_remaining,
            card.title
        );
    }
    println!(
        "showing {} of {} (sort={} {:?}, filters={}, more={})",
        cards.len(),
        view.total_matched,
        sort.sort_by,
        sort.direction,
        view.active_filter_count,
        view.has_more
    );
    Ok(())
}
