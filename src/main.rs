use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use timeseriesui::cli::{self, Args};
use timeseriesui::config::Config;
use timeseriesui::router::{AppContext, Router};
use timeseriesui::server::{Server, tls_acceptor};
use timeseriesui::static_files::EmbeddedUi;
use timeseriesui::ProxyError;
use tokio::signal;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = timeseriesui::logging::init(&args.logging()) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Some(path) = args.generate_connections.clone() {
        match cli::generate_connections_file(&path) {
            Ok(()) => {
                println!("Sample connections file generated: {}", path.display());
                return;
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ProxyError> {
    let config = args.into_config()?;

    let tls = config.tls.as_ref().map(tls_acceptor).transpose()?;

    let host = config.host.clone();
    let port = config.port;
    print_banner(&config);

    let context = AppContext::new(config, Arc::new(EmbeddedUi))?;
    let router = Arc::new(Router::new(context)?);

    let listener = Server::bind(&host, port).await?;
    let server = Server::new(router, tls);

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn print_banner(config: &Config) {
    println!("TimeseriesUI {} starting on {}", config.version, config.ui_url());
    if config.connections.is_empty() {
        println!("No default connections, add them in the UI.");
    } else {
        for connection in &config.connections {
            println!("  [{}] {} → {}", connection.backend_type, connection.name, connection.url);
        }
    }
    println!("Press Ctrl+C to stop.");
}
