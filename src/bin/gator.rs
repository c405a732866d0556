use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mascp_gator::app::{App, FetchOptions};
use mascp_gator::cache::BackendKind;
use mascp_gator::config::ConfigLoader;
use mascp_gator::context::Gator;
use mascp_gator::domain::{Accession, TransportMode, parse_date};
use mascp_gator::error::GatorError;
use mascp_gator::output::JsonOutput;
use mascp_gator::transport::{HttpMethod, ResponseFormat};

#[derive(Parser)]
#[command(name = "gator")]
#[command(about = "Retrieve protein annotation data and manage the local result cache")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    /// Override the configured cache backend.
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Retrieve one accession from a service")]
    Fetch(FetchArgs),
    #[command(about = "Inspect or prune the result cache")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct FetchArgs {
    service: String,
    endpoint: String,
    accession: String,

    #[arg(long)]
    dataset: Option<String>,

    #[arg(long, default_value = "get")]
    method: HttpMethod,

    #[arg(long, default_value = "json")]
    format: ResponseFormat,

    #[arg(long, default_value = "async")]
    mode: TransportMode,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "List cached services starting with a prefix")]
    Services { prefix: Option<String> },
    #[command(about = "List accessions cached for a service")]
    Accessions { service: String },
    #[command(about = "List the days a service was retrieved")]
    History { service: String },
    #[command(about = "Delete cached records for a service")]
    Clear {
        service: String,
        accession: Option<String>,
    },
    #[command(about = "Delete records retrieved on or before a date (YYYY-MM-DD)")]
    Sweep { before: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<GatorError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GatorError) -> u8 {
    match error {
        GatorError::MissingConfig
        | GatorError::ConfigRead(_)
        | GatorError::ConfigParse(_)
        | GatorError::UnknownService(_) => 2,
        error if error.is_transport() => 3,
        _ => 1,
    }
}

async fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve_or_default(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config = config.with_backend(backend)?;
    }
    let app = App::new(Gator::from_config(&config)?);

    match cli.command {
        Commands::Fetch(args) => {
            let accession: Accession = args.accession.parse()?;
            let options = FetchOptions {
                service: args.service,
                endpoint: Some(args.endpoint),
                dataset: args.dataset,
                method: args.method,
                format: args.format,
                mode: args.mode,
                use_cache: !args.no_cache,
            };
            let result = app.fetch(accession, options).await?;
            JsonOutput::print_fetch(&result).into_diagnostic()?;
        }
        Commands::Cache(args) => match args.command {
            CacheCommand::Services { prefix } => {
                let result = app.services(prefix.as_deref().unwrap_or(""))?;
                JsonOutput::print_services(&result).into_diagnostic()?;
            }
            CacheCommand::Accessions { service } => {
                let result = app.accessions(&service)?;
                JsonOutput::print_accessions(&result).into_diagnostic()?;
            }
            CacheCommand::History { service } => {
                let result = app.history(&service)?;
                JsonOutput::print_history(&result).into_diagnostic()?;
            }
            CacheCommand::Clear { service, accession } => {
                let result = app.clear(&service, accession.as_deref())?;
                JsonOutput::print_clear(&result).into_diagnostic()?;
            }
            CacheCommand::Sweep { before } => {
                let result = app.sweep(parse_date(&before)?)?;
                JsonOutput::print_clear(&result).into_diagnostic()?;
            }
        },
    }
    Ok(())
}
