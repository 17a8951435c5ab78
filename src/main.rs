use std::{process::ExitCode, sync::Arc};

use capability_hub::{
    build_app, build_dispatcher,
    config::Config,
    dispatcher::{CallScope, Dispatcher},
    domain::descriptor::CapabilityKind,
    logging, shutdown_signal, stdio, AppState,
};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

/// Serves every registered capability provider over MCP.
#[derive(Parser, Debug)]
#[command(name = "capability-hub")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve over stdio, or over HTTP/SSE when a host or port is given
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// List tools as JSON
    Tools,
    /// List resource types as JSON
    Resources,
    /// List prompts as JSON
    Prompts,
    /// Aggregate health of every provider
    Health,
    /// Configuration info of every provider
    Info,
    /// Invoke a tool, or read a resource when given a resource URI
    Call {
        address: String,
        /// Arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    logging::init_logging();

    let args = Args::parse();
    let config = Config::from_env()?;
    let dispatcher = build_dispatcher(&config);

    match args.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve {
            host: None,
            port: None,
        } => {
            info!(host = %config.host_name, "serving over stdio");
            stdio::serve_stdio(dispatcher).await;
        }
        Command::Serve { host, port } => {
            serve_http(config.with_bind(host, port)?, dispatcher).await?
        }
        Command::Tools => print_catalog(&dispatcher, CapabilityKind::Tool)?,
        Command::Resources => print_catalog(&dispatcher, CapabilityKind::Resource)?,
        Command::Prompts => print_catalog(&dispatcher, CapabilityKind::Prompt)?,
        Command::Health => {
            let health = dispatcher.registry().aggregate_health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&dispatcher.registry().info())?);
        }
        Command::Call { address, args } => return call(&dispatcher, &address, args).await,
    }

    Ok(ExitCode::SUCCESS)
}

async fn serve_http(
    config: Config,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bind_socket = config.bind_socket()?;
    let state = AppState::new(config.api_token.clone(), dispatcher);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        auth = config.api_token.is_some(),
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn print_catalog(
    dispatcher: &Dispatcher,
    kind: CapabilityKind,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = dispatcher.list_capabilities(kind);
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

async fn call(
    dispatcher: &Arc<Dispatcher>,
    address: &str,
    args: Option<String>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let arguments = args
        .map(|args| serde_json::from_str::<Value>(&args))
        .transpose()?;

    let result = if address.contains("://") {
        dispatcher.read_resource(address, None).await
    } else {
        dispatcher
            .call_tool(address, arguments, CallScope::default())
            .await
    };

    match result {
        Ok(contents) => {
            println!("{}", serde_json::to_string_pretty(&contents)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let body = json!({ "error": { "code": err.code(), "message": err.to_string() } });
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
