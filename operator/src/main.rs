pub use controller::*;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use actix_web::{App, HttpServer, middleware, web::Data};

fn init_tracing(json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| Error::Config(format!("invalid log filter: {e}")))?;
    let collector = Registry::default()
        .with(env_filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer));
    tracing::subscriber::set_global_default(collector).map_err(|e| Error::Other(e.to_string()))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Parameters::parse();
    init_tracing(params.log_json)?;
    if let Err(e) = params.validate() {
        error!(error = %e, "invalid configuration");
        return Err(e);
    }

    let manager = Manager::new(&params).await?;
    let data = manager.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(data.clone()))
            .wrap(middleware::Logger::default().exclude("/health").exclude("/readyz"))
            .configure(server::configure)
    })
    .bind(&params.listen)?
    .shutdown_timeout(5)
    .disable_signals()
    .run();
    let handle = server.handle();
    info!(listen = %params.listen, "listening");

    tokio::select! {
        res = server => {
            warn!("actix exited");
            manager.shutdown().await;
            res?;
        }
        _ = shutdown_signal() => {
            // refuse new notifications before draining the runners
            manager.shutdown().await;
            handle.stop(true).await;
            info!("stopped");
        }
    }
    Ok(())
}
