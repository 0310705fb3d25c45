use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use maris_resource_harvester::app::{App, HarvestOptions};
use maris_resource_harvester::cache::CacheStore;
use maris_resource_harvester::config::ConfigLoader;
use maris_resource_harvester::error::HarvestError;
use maris_resource_harvester::github::{GithubSearchClient, SearchItem};
use maris_resource_harvester::net::{CancelToken, HttpFetcher};
use maris_resource_harvester::output::JsonOutput;
use maris_resource_harvester::portal::HttpPortalClient;
use maris_resource_harvester::store::Store;
use maris_resource_harvester::zenodo::{Record, ZenodoClient};

#[derive(Parser)]
#[command(name = "maris-rh")]
#[command(about = "Harvest announced marine-science resources into a verified local tree")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Discover, resolve, and download the configured resources")]
    Run(RunArgs),
    #[command(about = "List resources recorded by the last run's ledger")]
    List,
    #[command(about = "Clear the download tree")]
    Clear,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    concurrency: Option<usize>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(harvest) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(harvest));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::MissingConfig
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::MissingSeedUrl
        | HarvestError::InvalidSeedUrl(_)
        | HarvestError::InvalidSpecifier(_) => 2,
        HarvestError::PortalHttp(_)
        | HarvestError::PortalStatus { .. }
        | HarvestError::CodeSearchHttp(_)
        | HarvestError::CodeSearchStatus { .. }
        | HarvestError::CodeSearchQuota
        | HarvestError::RecordsHttp(_)
        | HarvestError::RecordsStatus { .. }
        | HarvestError::FetchHttp(_)
        | HarvestError::FetchStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_harvest(args),
        Commands::List => run_list(),
        Commands::Clear => run_clear(),
    }
}

fn run_harvest(args: RunArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;

    let store = Store::new(&config.output_dir).into_diagnostic()?;
    let cache = CacheStore::open(config.cache_expiry_days).into_diagnostic()?;
    let portal = HttpPortalClient::new().into_diagnostic()?;
    let search = GithubSearchClient::new().into_diagnostic()?;
    let records = ZenodoClient::new().into_diagnostic()?;
    let net = HttpFetcher::new().into_diagnostic()?;
    let app = App::new(store, cache, portal, search, records, net);

    let options = HarvestOptions {
        force: args.force,
        no_cache: args.no_cache,
        dry_run: args.dry_run,
        concurrency: args.concurrency,
    };
    let cancel = CancelToken::new();
    let result = app
        .harvest(&config, options, &cancel, &JsonOutput)
        .into_diagnostic()?;
    JsonOutput::print_harvest(&result).into_diagnostic()?;
    Ok(())
}

fn run_list() -> miette::Result<()> {
    let config = ConfigLoader::resolve(None).into_diagnostic()?;
    let store = Store::new(&config.output_dir).into_diagnostic()?;
    let cache = CacheStore::open(config.cache_expiry_days).into_diagnostic()?;
    let app = App::new(store, cache, NopPortal, NopSearch, NopRecords, NopNet);
    let result = app.list(&JsonOutput).into_diagnostic()?;
    JsonOutput::print_list(&result).into_diagnostic()?;
    Ok(())
}

fn run_clear() -> miette::Result<()> {
    let config = ConfigLoader::resolve(None).into_diagnostic()?;
    let store = Store::new(&config.output_dir).into_diagnostic()?;
    let cache = CacheStore::open(config.cache_expiry_days).into_diagnostic()?;
    let app = App::new(store, cache, NopPortal, NopSearch, NopRecords, NopNet);
    let result = app.clear(&JsonOutput).into_diagnostic()?;
    JsonOutput::print_clear(&result).into_diagnostic()?;
    Ok(())
}

struct NopPortal;
struct NopSearch;
struct NopRecords;
struct NopNet;

impl maris_resource_harvester::portal::PortalClient for NopPortal {
    fn fetch_page(&self, _url: &str) -> Result<String, HarvestError> {
        Err(HarvestError::PortalHttp(
            "portal client not configured".to_string(),
        ))
    }
}

impl maris_resource_harvester::github::CodeSearchClient for NopSearch {
    fn search(&self, _query: &str, _per_page: u32) -> Result<Vec<SearchItem>, HarvestError> {
        Err(HarvestError::CodeSearchHttp(
            "code search client not configured".to_string(),
        ))
    }
}

impl maris_resource_harvester::zenodo::RecordsClient for NopRecords {
    fn search_records(&self, _query: &str, _size: u32) -> Result<Vec<Record>, HarvestError> {
        Err(HarvestError::RecordsHttp(
            "records client not configured".to_string(),
        ))
    }
}

impl maris_resource_harvester::net::Prober for NopNet {
    fn probe(
        &self,
        _url: &str,
    ) -> Result<maris_resource_harvester::sniff::ResponseHead, HarvestError> {
        Err(HarvestError::FetchHttp("fetcher not configured".to_string()))
    }
}

impl maris_resource_harvester::net::Fetcher for NopNet {
    fn fetch_to(
        &self,
        _url: &str,
        _destination: &std::path::Path,
        _cancel: &CancelToken,
    ) -> Result<u64, HarvestError> {
        Err(HarvestError::FetchHttp("fetcher not configured".to_string()))
    }
}
