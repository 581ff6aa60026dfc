//! Command-line front end: compiles a JSON-encoded query tree against a TOML
//! service model and prints the resulting request.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use odata_query::{
    config::{default_config_path, CompilerConfig},
    query::{CompileErrorWithCode, Expr, InMemoryMetadata, QueryCompiler, QueryComponents},
};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "odataq",
    version,
    about = "Compiles query expression trees into OData requests",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "ODATAQ_CONFIG",
        help = "Compiler configuration (defaults to the user config dir)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a query tree into a request.
    Compile {
        #[arg(long, value_name = "FILE", help = "TOML service model")]
        model: PathBuf,

        #[arg(long, value_name = "FILE", help = "JSON-encoded query expression")]
        query: PathBuf,

        #[arg(long, value_name = "URI", help = "Override the configured service root")]
        base_uri: Option<String>,
    },
    /// Print the effective configuration.
    ShowConfig,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env("ODATAQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = CompilerConfig::load(cli.config.clone())?;

    match cli.command {
        Command::Compile {
            model,
            query,
            base_uri,
        } => {
            if let Some(base_uri) = base_uri {
                config.base_uri = base_uri;
            }
            let metadata = InMemoryMetadata::load(&model)?;
            let text = fs::read_to_string(&query)
                .map_err(|err| format!("failed to read query {}: {err}", query.display()))?;
            let expr: Expr = serde_json::from_str(&text)?;
            let compiler = QueryCompiler::new(config, Arc::new(metadata));
            let components = compiler
                .compile(&expr)
                .map_err(|err| CompileErrorWithCode(&err).to_string())?;
            emit(&cli.format, &components, print_components_text)?;
        }
        Command::ShowConfig => match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            OutputFormat::Text => {
                let source = cli
                    .config
                    .or_else(default_config_path)
                    .filter(|path| path.exists());
                match source {
                    Some(path) => println!("# loaded from {}", path.display()),
                    None => println!("# defaults"),
                }
                print!("{}", config.to_toml_string()?);
            }
        },
    }
    Ok(())
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_components_text(components: &QueryComponents) {
    println!("{} {}", components.http_method().as_str(), components.uri());
    println!("  version={}", components.version());
    println!("  element_type={}", components.element_type());
    if let Some(single) = components.single_result() {
        println!("  single_result={single}");
    }
    if let Some(projector) = components.projector() {
        println!("  projector={}", Expr::Lambda(projector.clone()));
    }
    for param in components.uri_parameters() {
        println!("  uri_parameter {}={}", param.name, param.value);
    }
    for param in components.body_parameters() {
        println!("  body_parameter {}={}", param.name, param.value);
    }
}
