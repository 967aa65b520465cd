use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use pmwiki_archive_core::convert::{
    ConvertOptions, ConvertReport, PageState, convert_pages, plan_pages,
};
use pmwiki_archive_core::fetch::{PreviewSettings, fetch_revision_content};
use pmwiki_archive_core::history::{parse_history_record, read_history_file};
use pmwiki_archive_core::runtime::{
    PathOverrides, ResolutionContext, Runtime, ensure_runtime_ready_for_convert, init_layout,
    inspect_runtime, normalize_for_display, resolve_runtime,
};
use pmwiki_archive_core::session::{PmWikiClient, PmWikiClientConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pmwiki-archive",
    version,
    about = "Archive the revision history of PmWiki pages as JSON"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Enable debug logging (or set PMWIKI_ARCHIVE_LOG)")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the state directory and a starter config")]
    Init(InitArgs),
    #[command(about = "Convert every eligible page that has no archive yet")]
    Convert(ConvertArgs),
    #[command(about = "List eligible pages and whether they are converted")]
    Status(SelectionArgs),
    #[command(about = "Print the page name and revisions parsed from a wiki.d file")]
    Inspect(InspectArgs),
    #[command(about = "Recover the rendered content of a single revision")]
    Preview(PreviewArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct SelectionArgs {
    #[arg(long, value_name = "PATH", help = "Directory holding wiki.d page files")]
    source_dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Directory receiving page archives")]
    output_dir: Option<PathBuf>,
    #[arg(short = 'n', long = "namespace", value_name = "NAME", help = "Eligible namespace (repeatable)")]
    namespaces: Vec<String>,
    #[arg(long = "ignore", value_name = "NAME", help = "Page name to skip (repeatable)")]
    ignored_names: Vec<String>,
    #[arg(long, value_name = "N", help = "Skip the first N sorted directory entries")]
    offset: Option<usize>,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    #[command(flatten)]
    selection: SelectionArgs,
    #[arg(long, help = "Do not log in even when credentials are configured")]
    no_login: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    file: PathBuf,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    #[arg(help = "Page name, e.g. Main.HomePage")]
    page: String,
    #[arg(help = "Ten-digit diff identifier")]
    diff: String,
    #[arg(long, help = "Do not log in even when credentials are configured")]
    no_login: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Convert(args)) => run_convert(&runtime, args),
        Some(Commands::Status(args)) => run_status(&runtime, args),
        Some(Commands::Inspect(args)) => run_inspect(args),
        Some(Commands::Preview(args)) => run_preview(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = env::var("PMWIKI_ARCHIVE_LOG").unwrap_or_else(|_| {
        if verbose {
            "pmwiki_archive=debug,pmwiki_archive_core=debug".to_string()
        } else {
            "pmwiki_archive=info,pmwiki_archive_core=info".to_string()
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(filter))
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let resolved = resolve_runtime_paths(runtime, None)?;
    let paths = &resolved.paths;
    let report = init_layout(paths, args.force)?;

    println!("Initialized pmwiki-archive layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("source_dir: {}", normalize_for_display(&paths.source_dir));
    println!("output_dir: {}", normalize_for_display(&paths.output_dir));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_convert(runtime: &RuntimeOptions, args: ConvertArgs) -> Result<()> {
    let resolved = resolve_runtime_paths(runtime, Some(&args.selection))?;
    let status = inspect_runtime(&resolved.paths);
    ensure_runtime_ready_for_convert(&resolved.paths, &status)?;
    let options = convert_options(&resolved, &args.selection)?;

    let mut client = open_session(&resolved, args.no_login)?;
    let settings = PreviewSettings::from_config(&resolved.config);
    let report = convert_pages(&mut client, &settings, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_convert_report(&report);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.paths.diagnostics());
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions, args: SelectionArgs) -> Result<()> {
    let resolved = resolve_runtime_paths(runtime, Some(&args))?;
    let status = inspect_runtime(&resolved.paths);

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&resolved.paths.project_root));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("source_dir: {}", normalize_for_display(&resolved.paths.source_dir));
    println!("source_dir_exists: {}", format_flag(status.source_dir_exists));
    println!("output_dir: {}", normalize_for_display(&resolved.paths.output_dir));
    println!("output_dir_exists: {}", format_flag(status.output_dir_exists));

    if status.source_dir_exists {
        let options = convert_options(&resolved, &args)?;
        let plan = plan_pages(&options)?;
        let converted = plan
            .iter()
            .filter(|item| item.state == PageState::Converted)
            .count();
        println!("pages.eligible: {}", plan.len());
        println!("pages.converted: {converted}");
        println!("pages.pending: {}", plan.len() - converted);
        for item in plan.iter().filter(|item| item.state == PageState::Pending) {
            println!("pending: {}", item.page.file_name);
        }
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.paths.diagnostics());
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let record = read_history_file(&args.file)?;
    let history = parse_history_record(&record)
        .with_context(|| format!("failed to parse {}", normalize_for_display(&args.file)))?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

fn run_preview(runtime: &RuntimeOptions, args: PreviewArgs) -> Result<()> {
    let resolved = resolve_runtime_paths(runtime, None)?;
    let mut client = open_session(&resolved, args.no_login)?;
    let settings = PreviewSettings::from_config(&resolved.config);

    match fetch_revision_content(&mut client, &settings, &args.page, &args.diff)? {
        Some(content) => println!("{content}"),
        None => bail!("{} has no recoverable content at diff {}", args.page, args.diff),
    }
    Ok(())
}

fn open_session(resolved: &Runtime, no_login: bool) -> Result<PmWikiClient> {
    let mut client = PmWikiClient::new(PmWikiClientConfig::from_config(&resolved.config))?;
    if no_login {
        return Ok(client);
    }
    match (credential("WIKI_BOT_USER"), credential("WIKI_BOT_PASS")) {
        (Some(username), Some(password)) => client.login(&username, &password)?,
        _ => warn!("WIKI_BOT_USER/WIKI_BOT_PASS not set; continuing without login"),
    }
    Ok(client)
}

fn convert_options(resolved: &Runtime, selection: &SelectionArgs) -> Result<ConvertOptions> {
    let convert = &resolved.config.convert;
    let namespaces = if selection.namespaces.is_empty() {
        convert.namespaces.clone()
    } else {
        selection.namespaces.clone()
    };
    if namespaces.is_empty() {
        bail!("no eligible namespaces: pass --namespace or set [convert].namespaces");
    }
    let ignored_names = if selection.ignored_names.is_empty() {
        convert.ignored_names.clone()
    } else {
        selection.ignored_names.clone()
    };

    Ok(ConvertOptions {
        source_dir: resolved.paths.source_dir.clone(),
        output_dir: resolved.paths.output_dir.clone(),
        namespaces: namespaces.into_iter().collect::<BTreeSet<_>>(),
        ignored_names: ignored_names.into_iter().collect::<BTreeSet<_>>(),
        start_offset: selection.offset.or(convert.start_offset).unwrap_or(0),
    })
}

fn print_convert_report(report: &ConvertReport) {
    println!("convert");
    println!("scanned_entries: {}", report.scanned_entries);
    println!("eligible_pages: {}", report.eligible_pages);
    println!("converted: {}", report.converted);
    println!("already_converted: {}", report.already_converted);
    println!("skipped_missing_name: {}", report.skipped_missing_name);
    println!("revisions.total: {}", report.revisions_total);
    println!("revisions.recovered: {}", report.revisions_recovered);
    println!("revisions.missing: {}", report.revisions_missing);
    println!("request_count: {}", report.request_count);
    for page in &report.pages {
        match &page.detail {
            Some(detail) => println!("page: {} {} ({detail})", page.file_name, page.action.as_str()),
            None => println!("page: {} {}", page.file_name, page.action.as_str()),
        }
    }
}

fn resolve_runtime_paths(
    runtime: &RuntimeOptions,
    selection: Option<&SelectionArgs>,
) -> Result<Runtime> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        source_dir: selection.and_then(|selection| selection.source_dir.clone()),
        output_dir: selection.and_then(|selection| selection.output_dir.clone()),
    };

    let initial = resolve_runtime(&context, &overrides)?;
    let project_env = initial.paths.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_runtime(&context, &overrides)
}

fn credential(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
