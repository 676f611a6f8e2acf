use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use perfboard_sync::cache::RequestCache;
use perfboard_sync::config::{ConfigLoader, ResolvedConfig};
use perfboard_sync::error::SyncError;
use perfboard_sync::normalize::RowKind;
use perfboard_sync::output::{FetchReport, JsonOutput};
use perfboard_sync::period::{self, THIS_YEAR};
use perfboard_sync::prefs::{ORGANIZATION_KEY, PreferenceStore};
use perfboard_sync::rpc::{FetchExecutor, RpcHttpClient};
use perfboard_sync::staleness::ConsumerId;
use perfboard_sync::sync::{MemoryAddressBar, StateSynchronizer};
use perfboard_sync::view::{LoadOutcome, ViewLoader, ViewQuery};

#[derive(Parser)]
#[command(name = "perfboard")]
#[command(about = "Fetch and normalize performance dashboard views from a remote procedure backend")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch a configured view and print its normalized rows")]
    Fetch(FetchArgs),
    #[command(about = "Resolve a period label to its time range")]
    Period(PeriodArgs),
    #[command(about = "List the period labels a picker offers")]
    Periods(PeriodsArgs),
    #[command(about = "Manage remembered preferences")]
    Prefs(PrefsArgs),
}

#[derive(Args)]
struct FetchArgs {
    view: String,

    #[arg(long, help = "Organization id; remembered for later runs")]
    org: Option<String>,

    #[arg(long)]
    period: Option<String>,

    #[arg(long, help = "Address-bar query to restore filters from")]
    query: Option<String>,

    #[arg(long = "filter", value_name = "KEY=VALUE", help = "Filter assignment, repeatable")]
    filters: Vec<String>,
}

#[derive(Args)]
struct PeriodArgs {
    #[arg(default_value = THIS_YEAR)]
    label: String,

    #[arg(long, help = "Fail on unrecognized labels instead of using the current year")]
    strict: bool,
}

#[derive(Args)]
struct PeriodsArgs {
    #[arg(long, default_value_t = 4)]
    quarters: usize,
}

#[derive(Args)]
struct PrefsArgs {
    #[command(subcommand)]
    command: PrefsCommand,
}

#[derive(Subcommand)]
enum PrefsCommand {
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
    List,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::MissingConfig
        | SyncError::UnknownView(_)
        | SyncError::PreferenceNotFound(_)
        | SyncError::NotReady { .. } => 2,
        SyncError::Remote { .. } | SyncError::RpcSetup(_) => 3,
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
        Commands::Fetch(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            run_fetch(args, &config)
        }
        Commands::Period(args) => run_period(args),
        Commands::Periods(args) => {
            let options = period::period_options(&Local::now(), args.quarters);
            JsonOutput::print_options(&options).into_diagnostic()
        }
        Commands::Prefs(args) => run_prefs(args.command),
    }
}

fn run_fetch(args: FetchArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let view = config.view(&args.view)?.clone();
    let prefs = PreferenceStore::new()?;
    let organization = match args.org {
        Some(org) => {
            prefs.set(ORGANIZATION_KEY, &org)?;
            Some(org)
        }
        None => prefs.get(ORGANIZATION_KEY)?,
    };

    let bar = Arc::new(MemoryAddressBar::from_query_string(
        args.query.as_deref().unwrap_or_default(),
    ));
    let mut sync = StateSynchronizer::new(Arc::clone(&bar), config.filters.clone());
    sync.load();
    let filters = args
        .filters
        .iter()
        .map(|assignment| parse_filter(assignment))
        .collect::<Result<Vec<_>, _>>()?;
    let query =
        ViewQuery::with_overrides(organization, &mut sync, args.period.as_deref(), filters);
    sync.commit();

    let now = Local::now();
    if query.ready(&now).is_none() {
        return Err(SyncError::NotReady {
            view: view.name,
            missing: "organization (pass --org)".to_string(),
        }
        .into());
    }

    let client = RpcHttpClient::new(config.endpoint()?, config.api_key.clone(), config.timeout)?;
    let mut executor = FetchExecutor::new(Arc::new(client), config.schema.clone());
    if let Some(fallback) = &config.fallback_schema {
        executor = executor.with_fallback_schema(fallback.clone());
    }
    let procedure = view.procedure.clone();
    let ranked = view.hints.kind == RowKind::Leaderboard;
    let loader = ViewLoader::new(
        RequestCache::new(executor),
        ConsumerId::new(format!("cli:{}", view.name)),
        view,
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    debug!(procedure = %procedure, "loading view");
    match runtime.block_on(loader.load(&query, &now)) {
        LoadOutcome::Applied(model) => {
            let report = FetchReport {
                model: &model,
                query: bar.query_string(),
                ranking: ranked.then(|| model.ranked()),
            };
            JsonOutput::print_fetch(&report).into_diagnostic()
        }
        LoadOutcome::Failed(error) => Err(SyncError::Remote {
            procedure,
            message: error.message,
            code: error.code,
        }
        .into()),
        LoadOutcome::NotReady => Err(SyncError::NotReady {
            view: loader.view().name.clone(),
            missing: "organization (pass --org)".to_string(),
        }
        .into()),
        LoadOutcome::Stale => Err(miette::Report::msg("view load was superseded")),
    }
}

fn run_period(args: PeriodArgs) -> miette::Result<()> {
    let now = Local::now();
    let period = if args.strict {
        period::try_resolve(&args.label, &now)?
    } else {
        period::resolve(&args.label, &now)
    };
    JsonOutput::print_period(&period).into_diagnostic()
}

fn run_prefs(command: PrefsCommand) -> miette::Result<()> {
    let prefs = PreferenceStore::new()?;
    match command {
        PrefsCommand::Get { key } => {
            let value = prefs
                .get(&key)?
                .ok_or_else(|| SyncError::PreferenceNotFound(key))?;
            println!("{value}");
            Ok(())
        }
        PrefsCommand::Set { key, value } => Ok(prefs.set(&key, &value)?),
        PrefsCommand::Unset { key } => {
            if !prefs.remove(&key)? {
                return Err(SyncError::PreferenceNotFound(key).into());
            }
            Ok(())
        }
        PrefsCommand::List => JsonOutput::print_preferences(&prefs.load()?).into_diagnostic(),
    }
}

fn parse_filter(assignment: &str) -> Result<(String, String), SyncError> {
    let (key, value) = assignment
        .split_once('=')
        .ok_or_else(|| SyncError::InvalidFilter(assignment.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(SyncError::InvalidFilter(assignment.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
