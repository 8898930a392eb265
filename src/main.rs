//! Quotaroute HTTP server
//!
//! Loads configuration, registers credentialed providers and serves routed
//! completions over HTTP.

use clap::Parser;
use quotaroute::{
    cli::{Cli, Command, credential_report, generate_config_template},
    config::{Config, EnvSecrets},
    handlers::{self, AppState},
    models::scheduler,
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output.as_deref()),
        Some(Command::Check) => check(&cli.config),
        Some(Command::Serve) | None => serve(&cli.config).await,
    }
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Wrote configuration template to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

fn check(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(config_path)?;
    let intents: Vec<&str> = config.intents.intents().collect();
    println!(
        "{}: {} providers, {} intents ({})",
        config_path,
        config.providers.len(),
        config.intents.len(),
        intents.join(", ")
    );
    for line in credential_report(&config, &EnvSecrets) {
        println!("  {}", line);
    }
    Ok(())
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_file(config_path)?);

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting Quotaroute server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(Arc::clone(&config), &EnvSecrets)?;
    for line in state.reporter().summary(Some(state.router().adapters())) {
        tracing::info!(provider = %line, "Provider registered");
    }

    if config.quota.enable_reset_task {
        scheduler::start_reset_task(
            Arc::clone(state.router().health()),
            config.quota.reset_utc_hour,
        );
    } else {
        tracing::info!("Quota reset task disabled; daily counters reset only on restart");
    }

    let app = handlers::app(state);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
