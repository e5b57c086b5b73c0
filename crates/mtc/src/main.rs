use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mtc_core::api::{MediaWikiClient, MediaWikiClientConfig, WikiAccess};
use mtc_core::candidate::{Rejection, TransferOptions};
use mtc_core::config::{DEFAULT_CONFIG_RELATIVE_PATH, MtcConfig, load_config};
use mtc_core::parser::Document;
use mtc_core::pipeline::{TransferContext, TransferReport};
use mtc_core::startup::load_transfer_settings;
use mtc_core::strip::Stripper;
use mtc_core::titles::strip_namespace;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(
    name = "mtc",
    version,
    about = "Generate Commons description pages for English Wikipedia files"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config_path: PathBuf,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config_path: cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_RELATIVE_PATH)),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Generate destination description pages for the given files")]
    Generate(GenerateArgs),
    #[command(about = "Report which files qualify and the names they would get")]
    Eligible(EligibleArgs),
    #[command(about = "Strip and parse a local wikitext file, printing its template tree")]
    Parse(ParseArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(required = true, value_name = "TITLE")]
    titles: Vec<String>,
    #[arg(long, help = "Skip the category blacklist and whitelist")]
    ignore_filter: bool,
    #[arg(long, help = "Append the tracking category to generated text")]
    tracking_category: bool,
    #[arg(short = 'c', long = "category", value_name = "NAME", help = "Extra destination category")]
    categories: Vec<String>,
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct EligibleArgs {
    #[arg(required = true, value_name = "TITLE")]
    titles: Vec<String>,
    #[arg(long, help = "Skip the category blacklist and whitelist")]
    ignore_filter: bool,
}

#[derive(Debug, Args)]
struct ParseArgs {
    path: PathBuf,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Generate(args) => run_generate(&runtime, args),
        Commands::Eligible(args) => run_eligible(&runtime, args),
        Commands::Parse(args) => run_parse(&runtime, args),
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mtc=info,mtc_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

struct Session {
    config: MtcConfig,
    source: MediaWikiClient,
    destination: MediaWikiClient,
    context: TransferContext,
}

fn open_session(runtime: &RuntimeOptions) -> Result<Session> {
    let config = load_runtime_config(runtime)?;
    let mut source = MediaWikiClient::new(MediaWikiClientConfig::source(&config))?;
    let destination = MediaWikiClient::new(MediaWikiClientConfig::destination(&config))?;
    let settings = load_transfer_settings(&mut source, &config)?;
    let context = TransferContext::new(settings, &config)?;
    Ok(Session {
        config,
        source,
        destination,
        context,
    })
}

fn run_generate(runtime: &RuntimeOptions, args: GenerateArgs) -> Result<()> {
    let mut session = open_session(runtime)?;
    let options = TransferOptions {
        ignore_filter: args.ignore_filter,
        tracking_category: args.tracking_category,
        categories: args.categories,
    };
    let report = session.context.run(
        &mut session.source,
        &mut session.destination,
        &args.titles,
        &options,
        &mut rand::thread_rng(),
    )?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report_text(&report),
    }
    if runtime.diagnostics {
        print_diagnostics(runtime, &session);
    }
    Ok(())
}

fn run_eligible(runtime: &RuntimeOptions, args: EligibleArgs) -> Result<()> {
    let mut session = open_session(runtime)?;
    let options = TransferOptions {
        ignore_filter: args.ignore_filter,
        ..TransferOptions::default()
    };
    let candidates = session.context.build_candidates(
        &mut session.source,
        &mut session.destination,
        &args.titles,
        &options,
        &mut rand::thread_rng(),
    )?;

    println!("eligibility");
    for candidate in &candidates {
        if let Some(rejection) = candidate.rejection() {
            println!("rejected: {} ({})", candidate.source_title, rejection_label(rejection));
        } else if let Some(error) = candidate.error() {
            println!("failed: {} ({error})", candidate.source_title);
        } else if let Some(destination) = &candidate.destination_title {
            println!(
                "eligible: {} -> {} (own_work: {})",
                candidate.source_title,
                destination,
                format_flag(candidate.own_work)
            );
        }
    }
    if runtime.diagnostics {
        print_diagnostics(runtime, &session);
    }
    Ok(())
}

fn run_parse(runtime: &RuntimeOptions, args: ParseArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let text = fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let stripper = Stripper::new(&[strip_namespace(config.marker_template()).to_string()])?;
    let document = Document::parse(&stripper.apply(&text))
        .with_context(|| format!("failed to parse {}", args.path.display()))?;
    println!("{}", serde_json::to_string_pretty(&document.tree())?);
    if runtime.diagnostics {
        eprintln!("[diagnostics]\nconfig_path: {}", normalize_path(&runtime.config_path));
    }
    Ok(())
}

fn load_runtime_config(runtime: &RuntimeOptions) -> Result<MtcConfig> {
    load_config(&runtime.config_path)
}

fn print_report_text(report: &TransferReport) {
    for record in &report.records {
        println!("== {} -> {} ==", record.source_title, record.destination_title);
        println!("{}", record.generated_text);
    }
    for rejected in &report.rejected {
        println!("rejected: {} ({})", rejected.title, rejection_label(&rejected.rejection));
    }
    for failure in &report.failures {
        println!("failed: {} ({})", failure.title, failure.error);
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, session: &Session) {
    eprintln!("[diagnostics]");
    eprintln!("config_path: {}", normalize_path(&runtime.config_path));
    eprintln!("source_api: {}", session.source.api_url());
    eprintln!("destination_api: {}", session.destination.api_url());
    eprintln!("config_page: {}", session.config.config_page());
    eprintln!(
        "marker_aliases: {}",
        session.context.settings.marker_aliases.join(", ")
    );
    eprintln!("redirects: {}", session.context.settings.redirects.len());
    eprintln!("existence_cache: {}", session.context.cache.len());
    eprintln!("source_requests: {}", session.source.request_count());
    eprintln!("destination_requests: {}", session.destination.request_count());
}

fn rejection_label(rejection: &Rejection) -> String {
    match rejection {
        Rejection::Missing => "missing on source".to_string(),
        Rejection::SharedDuplicate { duplicates } => {
            format!("already shared as {}", duplicates.join(", "))
        }
        Rejection::Blacklisted { category } => format!("blacklisted category {category}"),
        Rejection::NotWhitelisted => "no whitelisted category".to_string(),
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
