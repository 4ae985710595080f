use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use realmwiki_core::cache::ExistenceCache;
use realmwiki_core::config::{RealmWikiConfig, WikiConfigPatch, load_config, patch_wiki_config};
use realmwiki_core::existence::BatchChecker;
use realmwiki_core::generate::{MarkupGenerator, ResolvedMetadata, add_parent_realm_category};
use realmwiki_core::metadata::{MetadataStore, load_metadata};
use realmwiki_core::model::ObjectRecord;
use realmwiki_core::parse::parse_detailed;
use realmwiki_core::pool::CancellationToken;
use realmwiki_core::remote::{MediaWikiClient, MediaWikiClientConfig, WikiSession};
use realmwiki_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_runtime_ready_for_sync,
    init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use realmwiki_core::sync::{SyncOrchestrator, SyncReport, write_review_files};
use realmwiki_core::title::canonical_title;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const BOT_USER_ENV: &str = "REALMWIKI_BOT_USER";
const BOT_PASS_ENV: &str = "REALMWIKI_BOT_PASS";

#[derive(Debug, Parser)]
#[command(
    name = "realmwiki",
    version,
    about = "Generate, check and publish realm object pages on a MediaWiki site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, short, global = true, help = "Default log level to debug")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the metadata/ and .realmwiki/ layout with a commented config.
    Init(InitArgs),
    /// List realms and subrealms with object counts and resolved themes.
    Realms,
    /// Generate one object's page offline and print it.
    Render(RenderArgs),
    /// Recover Info/Obtaining sections from a saved page.
    Parse(ParseArgs),
    /// Check which object pages already exist on the wiki.
    Check(CheckArgs),
    /// Regenerate object pages and optionally publish them.
    Sync(SyncArgs),
    /// Inspect or reset the page existence cache.
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long)]
    force: bool,
    #[arg(long, help = "Skip writing .realmwiki/config.toml")]
    no_config: bool,
    #[arg(long, value_name = "URL", help = "Store this api.php endpoint in config")]
    api_url: Option<String>,
    #[arg(long, value_name = "TEXT", help = "Store this default edit summary in config")]
    edit_summary: Option<String>,
}

#[derive(Debug, Args)]
struct RenderArgs {
    object: String,
    #[arg(long, value_name = "REALM")]
    realm: Option<String>,
    #[arg(long, value_name = "PATH", help = "Use this file as the Info body")]
    info_file: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Use this file as the Obtaining body")]
    obtaining_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ParseArgs {
    file: PathBuf,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long, value_name = "REALM")]
    realm: Option<String>,
    #[arg(long, help = "Ignore cached answers and query again")]
    recheck: bool,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, value_name = "REALM")]
    realm: Option<String>,
    #[arg(long, value_name = "NAME")]
    object: Option<String>,
    #[arg(long, help = "Write pages to the wiki (requires bot credentials)")]
    publish: bool,
    #[arg(long, help = "Ignore cached answers and query again")]
    recheck: bool,
    #[arg(long, value_name = "TEXT", help = "Override the edit summary")]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommand {
    Stats,
    Invalidate { title: String },
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Realms) => run_realms(&runtime),
        Some(Commands::Render(args)) => run_render(&runtime, args),
        Some(Commands::Parse(args)) => run_parse(args),
        Some(Commands::Check(args)) => run_check(&runtime, args),
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::Cache(CacheArgs { command })) => match command {
            CacheSubcommand::Stats => run_cache_stats(&runtime),
            CacheSubcommand::Invalidate { title } => run_cache_invalidate(&runtime, &title),
            CacheSubcommand::Clear => run_cache_clear(&runtime),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "realmwiki=debug,realmwiki_core=debug"
    } else {
        "realmwiki=info,realmwiki_core=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let patched_config = if args.no_config {
        false
    } else {
        patch_wiki_config(
            &paths.config_path,
            &WikiConfigPatch {
                set_api_url: args.api_url,
                set_edit_summary: args.edit_summary,
            },
        )?
    };

    println!("Initialized realmwiki layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("metadata_dir: {}", normalize_path(&paths.metadata_dir));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("review_dir: {}", normalize_path(&paths.review_dir));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("patched_config: {patched_config}");
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_realms(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = load_project_metadata(&paths)?;
    let resolver = store.resolver();
    let counts = store.realm_counts();

    println!("realms");
    println!("metadata_dir: {}", normalize_path(&paths.metadata_dir));
    println!("objects: {}", store.records.len());
    for label in resolver.realm_labels() {
        let theme = resolver.resolve_realm_theme(label);
        println!(
            "realm: {label} objects={} background={} accent={}{}",
            counts.get(label).copied().unwrap_or(0),
            theme.background_image_ref,
            theme.accent_color,
            if theme.special_case.is_some() { " special" } else { "" }
        );
    }
    for (label, parent) in resolver.subrealm_labels() {
        let theme = resolver.resolve_realm_theme(label);
        println!(
            "subrealm: {label} parent={parent} objects={} background={} accent={}",
            counts.get(label).copied().unwrap_or(0),
            theme.background_image_ref,
            theme.accent_color
        );
    }

    let known: Vec<&str> = resolver
        .realm_labels()
        .into_iter()
        .chain(resolver.subrealm_labels().into_iter().map(|(label, _)| label))
        .collect();
    for (realm, count) in &counts {
        if !known.contains(&realm.as_str()) {
            println!("unlisted: {realm} objects={count} (default theme)");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, args: RenderArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let store = load_project_metadata(&paths)?;
    let resolver = store.resolver();

    let mut record = store
        .find_record(&args.object, args.realm.as_deref())
        .cloned()
        .with_context(|| match args.realm.as_deref() {
            Some(realm) => format!("no object named {} in realm {realm}", args.object),
            None => format!("no object named {}", args.object),
        })?;
    if let Some(path) = args.info_file.as_deref() {
        record.sections.info = read_text(path)?;
    }
    if let Some(path) = args.obtaining_file.as_deref() {
        record.sections.obtaining = read_text(path)?;
    }
    add_parent_realm_category(&resolver, &mut record);

    let resolved = ResolvedMetadata::resolve(&resolver, &record);
    let generator = MarkupGenerator::new(config.sync_options()?.generator);
    let markup = generator.generate(&record, &resolved)?;
    print!("{markup}");
    if !markup.ends_with('\n') {
        println!();
    }
    if record.sections.needs_manual_content() {
        warn!(title = %record.name, "page still needs manual Info/Obtaining content");
    }
    Ok(())
}

fn run_parse(args: ParseArgs) -> Result<()> {
    let raw = read_text(&args.file)?;
    let outcome = parse_detailed(&raw);
    if outcome.is_unrecognized() {
        warn!(path = %normalize_path(&args.file), "no Info/Obtaining structure recognized");
    }
    let payload = serde_json::json!({
        "info": outcome.sections.info,
        "obtaining": outcome.sections.obtaining,
        "found_info_header": outcome.found_info_header,
        "found_obtaining_header": outcome.found_obtaining_header,
        "used_hint_fallback": outcome.used_hint_fallback,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_check(runtime: &RuntimeOptions, args: CheckArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready_for_sync(&paths, &status)?;
    let config = load_config(&paths.config_path)?;
    let store = load_project_metadata(&paths)?;
    let records = select_records(&store, args.realm.as_deref(), None)?;

    let client = build_client(&config)?;
    let cache = open_cache(&paths, &config)?;
    let mut options = config.check_options()?;
    options.force_recheck = args.recheck;
    let titles: Vec<String> = records
        .iter()
        .filter(|record| !record.name.trim().is_empty())
        .map(|record| canonical_title(&record.name))
        .collect();

    let cancel = cancel_on_interrupt();
    let checker = BatchChecker::new(&client, &cache, options);
    let report = checker.check_all_detailed(&titles, &cancel);
    let flushed = cache.flush()?;

    let existing = report.results.values().filter(|exists| **exists).count();
    let missing: Vec<&String> = report
        .results
        .iter()
        .filter(|(_, exists)| !**exists)
        .map(|(title, _)| title)
        .collect();

    println!("existence check");
    println!("api_url: {}", client.api_url());
    println!("realm: {}", args.realm.as_deref().unwrap_or("<all>"));
    println!("titles: {}", titles.len());
    println!(
        "strategy: {}",
        report
            .strategy
            .map(|strategy| format!("{strategy:?}").to_lowercase())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("unresolved_policy: {}", options.unresolved);
    println!("from_cache: {}", report.from_cache);
    println!("queried: {}", report.queried);
    println!("unknown: {}", report.unknown);
    println!("requests: {}", report.requests);
    println!("existing: {existing}");
    println!("missing: {}", missing.len());
    if !titles.is_empty() {
        println!(
            "coverage: {:.1}%",
            existing as f64 * 100.0 / titles.len() as f64
        );
    }
    for title in missing {
        println!("missing.title: {title}");
    }
    println!("cache.flushed: {flushed}");
    print_diagnostics(runtime, &paths);

    if report.cancelled {
        bail!("check interrupted; completed answers were cached");
    }
    Ok(())
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready_for_sync(&paths, &status)?;
    let config = load_config(&paths.config_path)?;
    let store = load_project_metadata(&paths)?;
    let records: Vec<ObjectRecord> =
        select_records(&store, args.realm.as_deref(), args.object.as_deref())?
            .into_iter()
            .cloned()
            .collect();

    let client = build_client(&config)?;
    let cache = open_cache(&paths, &config)?;
    let resolver = store.resolver();
    let mut options = config.sync_options()?;
    options.check.force_recheck = args.recheck;
    if let Some(summary) = args.summary {
        options.edit_summary = summary;
    }

    let session = if args.publish {
        Some(login_from_env(&client)?)
    } else {
        None
    };
    let mut orchestrator = SyncOrchestrator::new(&client, &resolver, &cache, options);
    if let Some(session) = session.as_ref() {
        orchestrator = orchestrator.with_session(session);
    }

    info!(objects = records.len(), publish = args.publish, "starting sync");
    let cancel = cancel_on_interrupt();
    let report = orchestrator.sync_all(&records, args.publish, &cancel);
    let review_files = if args.publish {
        0
    } else {
        write_review_files(&report, &paths.review_dir)?
    };

    print_sync_report(&report, args.publish);
    if !args.publish {
        println!("review_dir: {}", normalize_path(&paths.review_dir));
        println!("review_files: {review_files}");
    }
    print_diagnostics(runtime, &paths);

    if report.cancelled {
        bail!("sync interrupted; rerun to continue from the cached checks");
    }
    if !report.failures.is_empty() || report.publish_failures > 0 {
        bail!(
            "sync finished with {} failed objects and {} failed writes",
            report.failures.len(),
            report.publish_failures
        );
    }
    Ok(())
}

fn print_sync_report(report: &SyncReport, publish: bool) {
    println!("sync");
    println!("mode: {}", if publish { "publish" } else { "review" });
    println!("objects: {}", report.results.len() + report.failures.len());
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("skipped: {}", report.skipped);
    println!("unchanged: {}", report.unchanged);
    println!("needs_manual_content: {}", report.needs_manual_content);
    println!("failed: {}", report.failures.len());
    println!("publish_failures: {}", report.publish_failures);
    println!("requests: {}", report.requests);
    if report.cancelled {
        println!("cancelled: yes");
    }
    for result in &report.results {
        if result.unchanged {
            continue;
        }
        println!(
            "page: {} [{}] planned={}{}{}",
            result.title,
            result.action.as_str(),
            result.planned.as_str(),
            if result.needs_manual_content {
                " needs-content"
            } else {
                ""
            },
            match result.publish_error.as_deref() {
                Some(error) => format!(" error={error}"),
                None => String::new(),
            }
        );
    }
    for failure in &report.failures {
        println!("failure: {} ({}): {}", failure.title, failure.realm, failure.error);
    }
}

fn run_cache_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let cache = open_cache(&paths, &config)?;
    let stats = cache.stats();

    println!("cache stats");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("entries: {}", stats.entries);
    println!("present: {}", stats.present);
    println!("absent: {}", stats.absent);
    println!("pending_writes: {}", stats.pending_writes);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_cache_invalidate(runtime: &RuntimeOptions, title: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if title.trim().is_empty() {
        bail!("cache invalidate requires a non-empty title");
    }
    let config = load_config(&paths.config_path)?;
    let cache = open_cache(&paths, &config)?;
    let removed = cache.invalidate(title);
    cache.flush()?;

    println!("cache invalidate");
    println!("title: {}", canonical_title(title));
    println!("removed: {}", format_flag(removed));
    Ok(())
}

fn run_cache_clear(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let cache = open_cache(&paths, &config)?;
    let before = cache.len();
    cache.clear();
    cache.flush()?;

    println!("cache clear");
    println!("removed_entries: {before}");
    Ok(())
}

/// First Ctrl-C asks running work to stop so completed answers are flushed;
/// a second one exits immediately.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    if let Err(error) = ctrlc::set_handler(interrupt_handler(cancel.clone())) {
        warn!(error = %error, "failed to install Ctrl-C handler");
    }
    cancel
}

fn interrupt_handler(cancel: CancellationToken) -> impl FnMut() + Send + 'static {
    move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        warn!("interrupt received; finishing in-flight requests");
        cancel.cancel();
    }
}

fn load_project_metadata(paths: &ResolvedPaths) -> Result<MetadataStore> {
    let store = load_metadata(&paths.metadata_dir)?;
    info!(
        objects = store.records.len(),
        realms = store.realm_counts().len(),
        "loaded metadata"
    );
    Ok(store)
}

fn select_records<'a>(
    store: &'a MetadataStore,
    realm: Option<&str>,
    object: Option<&str>,
) -> Result<Vec<&'a ObjectRecord>> {
    if let Some(name) = object {
        let record = store
            .find_record(name, realm)
            .with_context(|| format!("no object named {name}"))?;
        return Ok(vec![record]);
    }
    let records = match realm {
        Some(realm) => store.records_in_realm(realm),
        None => store.records.iter().collect(),
    };
    if records.is_empty() {
        match realm {
            Some(realm) => bail!("no objects found for realm {realm}"),
            None => bail!("no objects found under metadata/"),
        }
    }
    Ok(records)
}

fn build_client(config: &RealmWikiConfig) -> Result<MediaWikiClient> {
    MediaWikiClient::new(MediaWikiClientConfig::from_config(config))
}

fn open_cache(paths: &ResolvedPaths, config: &RealmWikiConfig) -> Result<ExistenceCache> {
    ExistenceCache::open(&paths.db_path, config.cache_flush_every())
}

fn login_from_env(client: &MediaWikiClient) -> Result<WikiSession> {
    let user = env::var(BOT_USER_ENV).unwrap_or_default();
    let pass = env::var(BOT_PASS_ENV).unwrap_or_default();
    if user.trim().is_empty() || pass.trim().is_empty() {
        bail!("--publish requires {BOT_USER_ENV} and {BOT_PASS_ENV} (set them in .env)");
    }
    let session = client.login(user.trim(), pass.trim())?;
    info!(user = session.user(), "logged in");
    Ok(session)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    normalize_for_display(path)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "realmwiki",
            "sync",
            "--realm",
            "Main Realm",
            "--publish",
            "--summary",
            "bulk refresh",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::Sync(args)) => {
                assert_eq!(args.realm.as_deref(), Some("Main Realm"));
                assert!(args.publish);
                assert!(!args.recheck);
                assert_eq!(args.summary.as_deref(), Some("bulk refresh"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::try_parse_from(["realmwiki", "cache", "stats", "--diagnostics", "-v"])
            .expect("parse");
        assert!(cli.diagnostics);
        assert!(cli.verbose);
        let runtime = RuntimeOptions::from_cli(&cli);
        assert!(runtime.diagnostics);
    }

    #[test]
    fn select_records_filters_by_realm_and_object() {
        let store = MetadataStore {
            records: vec![
                ObjectRecord::new("Dango", "Hard", "Main Realm"),
                ObjectRecord::new("Lamp", "Easy", "Main Realm"),
                ObjectRecord::new("Shell", "Easy", "Beach Realm"),
            ],
            ..MetadataStore::default()
        };
        assert_eq!(
            select_records(&store, Some("Main Realm"), None)
                .expect("realm")
                .len(),
            2
        );
        let single = select_records(&store, None, Some("shell")).expect("object");
        assert_eq!(single[0].name, "Shell");
        assert!(select_records(&store, Some("Void"), None).is_err());
    }

    #[test]
    fn first_interrupt_cancels_the_run() {
        let cancel = CancellationToken::new();
        let mut handler = interrupt_handler(cancel.clone());
        assert!(!cancel.is_cancelled());
        handler();
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn init_accepts_wiki_settings() {
        let cli = Cli::try_parse_from([
            "realmwiki",
            "init",
            "--api-url",
            "https://wiki.example.org/api.php",
            "--edit-summary",
            "bot refresh",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::Init(args)) => {
                assert_eq!(args.api_url.as_deref(), Some("https://wiki.example.org/api.php"));
                assert_eq!(args.edit_summary.as_deref(), Some("bot refresh"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_command_takes_a_file() {
        let cli = Cli::try_parse_from(["realmwiki", "parse", "page.wiki"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Parse(_))));
    }
}
