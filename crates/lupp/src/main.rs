use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use lupp_core::api::{MediaWikiClient, MediaWikiClientConfig, WikiQueryApi};
use lupp_core::config::{CONFIG_FILENAME, LuppConfig, SettingsOverrides, load_config};
use lupp_core::contributors::rank_contributors;
use lupp_core::persist::{load_error_log, load_store, save_error_log, save_store};
use lupp_core::progress::Progress;
use lupp_core::scrape::{ScrapeOutcome, ScrapeTarget, reanalyse, reconcile_existing, scrape_launch};
use lupp_core::split::split_by_subcategory;
use lupp_core::store::ScrapeStore;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(
    name = "lupp",
    version,
    about = "Scrape Wikipedia categories across language editions and aggregate page stats"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file (default: lupp.toml)")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape a category tree, or a list of article titles, and aggregate it
    Scrape(ScrapeArgs),
    /// Re-run aggregation on a saved store
    Analyze(StoreArgs),
    /// Re-walk a saved store in the secondary language, then aggregate
    Reconcile(ReconcileArgs),
    /// Write each direct subcategory of a saved store to its own file
    Split(SplitArgs),
    /// List contributors of a saved store by edits per language
    Contributors(ContributorsArgs),
}

#[derive(Debug, Args)]
struct ScrapeArgs {
    #[arg(help = "Category name, with or without namespace prefix")]
    category: Option<String>,
    #[arg(long, value_name = "FILE", help = "Scrape titles from a text file, one per line")]
    list: Option<PathBuf>,
    #[arg(short, long, value_name = "LANGS", help = "Pipe-separated languages, primary first")]
    languages: Option<String>,
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,
    #[arg(long, value_name = "DIR", default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct StoreArgs {
    #[arg(value_name = "STORE")]
    store: PathBuf,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    #[arg(value_name = "STORE")]
    store: PathBuf,
    #[arg(short, long, value_name = "LANGS", help = "Defaults to the languages of the store")]
    languages: Option<String>,
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,
}

#[derive(Debug, Args)]
struct SplitArgs {
    #[arg(value_name = "STORE")]
    store: PathBuf,
    #[arg(long, value_name = "DIR", help = "Defaults to the directory of the store")]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ContributorsArgs {
    #[arg(value_name = "STORE")]
    store: PathBuf,
    #[arg(long, value_name = "N", help = "Only print the top N")]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose)?;

    let started = Instant::now();
    let result = run(cli);
    println!("elapsed: {:.1}s", started.elapsed().as_secs_f64());
    result
}

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = FmtSubscriber::builder().with_target(false);
    let installed = if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(builder.with_max_level(level).finish())
    };
    installed.context("failed to set tracing subscriber")
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
    let config = load_config(&config_path)?;

    match cli.command {
        Commands::Scrape(args) => run_scrape(&config, args),
        Commands::Analyze(args) => run_analyze(args),
        Commands::Reconcile(args) => run_reconcile(&config, args),
        Commands::Split(args) => run_split(args),
        Commands::Contributors(args) => run_contributors(args),
    }
}

fn client(config: &LuppConfig) -> Result<Arc<dyn WikiQueryApi>> {
    let client: Arc<dyn WikiQueryApi> =
        Arc::new(MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?);
    Ok(client)
}

fn run_scrape(config: &LuppConfig, args: ScrapeArgs) -> Result<()> {
    let target = match (&args.category, &args.list) {
        (Some(category), None) => ScrapeTarget::Category(category.clone()),
        (None, Some(list)) => read_article_list(list)?,
        (Some(_), Some(_)) => bail!("give either a category or --list, not both"),
        (None, None) => bail!("missing category name or --list FILE"),
    };
    let settings = config.settings(&SettingsOverrides {
        languages: args.languages.clone(),
        max_depth: args.max_depth,
    })?;
    println!(
        "scraping {} in {} (max depth {})",
        target.title(),
        settings.languages.join("|"),
        settings.max_depth
    );

    let api = client(config)?;
    let (store_path, errors_path) = output_paths(&args.out, target.title());
    let progress = Progress::spinner(&format!("scraping {}", target.title()));
    match scrape_launch(api, settings, &target, progress) {
        Ok(outcome) => write_outcome(&outcome, &store_path, &errors_path),
        Err(failure) => {
            save_error_log(&errors_path, &failure.errors)?;
            println!("wrote {}", errors_path.display());
            bail!("scrape failed: {}", failure.reason)
        }
    }
}

fn run_analyze(args: StoreArgs) -> Result<()> {
    let mut store = load_store(&args.store)?;
    let errors_path = sibling_errors_path(&args.store);
    let mut errors = load_error_log(&errors_path)?;
    let report = reanalyse(&mut store, &mut errors);
    save_store(&args.store, &store)?;
    save_error_log(&errors_path, &errors)?;
    println!(
        "analyzed {} pages, {} issues",
        store.pages.len(),
        report.issues.len()
    );
    println!("wrote {}", args.store.display());
    Ok(())
}

fn run_reconcile(config: &LuppConfig, args: ReconcileArgs) -> Result<()> {
    let store = load_store(&args.store)?;
    let errors_path = sibling_errors_path(&args.store);
    let errors = load_error_log(&errors_path)?;
    let languages = args
        .languages
        .clone()
        .unwrap_or_else(|| store.stats.languages.join("|"));
    let settings = config.settings(&SettingsOverrides {
        languages: Some(languages),
        max_depth: args.max_depth,
    })?;

    let api = client(config)?;
    let progress = Progress::spinner(&format!("reconciling {}", store.stats.category_title));
    match reconcile_existing(api, settings, store, errors, progress) {
        Ok(outcome) => write_outcome(&outcome, &args.store, &errors_path),
        Err(failure) => {
            save_error_log(&errors_path, &failure.errors)?;
            bail!("reconcile failed: {}", failure.reason)
        }
    }
}

fn run_split(args: SplitArgs) -> Result<()> {
    let store = load_store(&args.store)?;
    let out = args
        .out
        .clone()
        .or_else(|| args.store.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let splits = split_by_subcategory(&store);
    if splits.is_empty() {
        println!("{} has no subcategories to split", store.stats.category_title);
        return Ok(());
    }
    for split in &splits {
        let (path, _) = output_paths(&out, &split.name);
        save_store(&path, &split.store)?;
        println!(
            "wrote {} ({} categories, {} pages)",
            path.display(),
            split.store.stats.categories_cnt,
            split.store.stats.pages_cnt
        );
    }
    Ok(())
}

fn run_contributors(args: ContributorsArgs) -> Result<()> {
    let store = load_store(&args.store)?;
    let ranking = rank_contributors(&store);
    println!(
        "{}: {} contributors, {} pages, {} contributor x page",
        store.stats.category_title,
        ranking.total_contributors,
        ranking.total_pages,
        ranking.total_pairs
    );
    println!("nr\tcontributor\t{}", ranking.languages.join("\t"));
    let limit = args.limit.unwrap_or(usize::MAX);
    for (index, tally) in ranking.contributors.iter().take(limit).enumerate() {
        let counts = ranking
            .languages
            .iter()
            .map(|lang| tally.edits_in(lang).to_string())
            .collect::<Vec<_>>();
        println!("{}\t{}\t{}", index + 1, tally.name, counts.join("\t"));
    }
    Ok(())
}

fn read_article_list(path: &Path) -> Result<ScrapeTarget> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let titles = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if titles.is_empty() {
        bail!("{} lists no titles", path.display());
    }
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "list".to_string());
    Ok(ScrapeTarget::ArticleList { name, titles })
}

fn write_outcome(outcome: &ScrapeOutcome, store_path: &Path, errors_path: &Path) -> Result<()> {
    save_store(store_path, &outcome.store)?;
    save_error_log(errors_path, &outcome.errors)?;
    print_summary(&outcome.store);
    println!("errors: {}", outcome.errors.len());
    println!("wrote {}", store_path.display());
    println!("wrote {}", errors_path.display());
    info!(issues = outcome.report.issues.len(), "outcome persisted");
    Ok(())
}

fn print_summary(store: &ScrapeStore) {
    let stats = &store.stats;
    println!("categories: {}", stats.categories_cnt);
    println!("pages: {}", stats.pages_cnt);
    if let (Some(from), Some(to)) = (&stats.date_from, &stats.date_to) {
        println!("pageviews: {from} .. {to}");
    }
    if let Some(seconds) = stats.response_time_s {
        println!("response_time_s: {seconds}");
    }
}

fn file_stem_for(title: &str) -> String {
    title.trim().replace(' ', "_")
}

fn output_paths(dir: &Path, title: &str) -> (PathBuf, PathBuf) {
    let stem = file_stem_for(title);
    (
        dir.join(format!("{stem}.json")),
        dir.join(format!("err_{stem}.json")),
    )
}

fn sibling_errors_path(store_path: &Path) -> PathBuf {
    let stem = store_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    store_path.with_file_name(format!("err_{stem}.json"))
}
