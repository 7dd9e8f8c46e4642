use anyhow::{bail, Context, Result};
use axum::serve;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use streamseed::controller::handle::spawn;
use streamseed::controller::session::{Controller, ControllerSettings};
use streamseed::core::config::Config;
use streamseed::core::routes::build_router;
use streamseed::core::startup::run_rollout;
use streamseed::core::state::AppState;
use streamseed::core::tracing_init::init_tracing;
use streamseed::engine::local::LocalEngine;
use streamseed::status::bus::EventBus;
use streamseed::status::poller::spawn_stats_poller;
use streamseed::stores::media_store::MediaStore;
use tokio::net::{TcpListener, UnixListener};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("config.toml")
    };

    // Load and validate configuration
    let config = Config::from_file(&config_path)
        .context(format!(
            "Failed to load configuration from '{}'. \
            If this is your first time running streamseed, copy config.example.toml to config.toml and adjust the values.",
            config_path.display()
        ))?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    // Build Tokio runtime with configured number of threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.num_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    // Run the async main function
    runtime.block_on(async_main(config, config_path))
}

async fn async_main(config: Config, config_path: PathBuf) -> Result<()> {
    info!(
        config_path = %config_path.display(),
        port = ?config.server.port,
        unix_socket = ?config.server.unix_socket,
        num_threads = config.server.num_threads,
        media_root = %config.media.root.display(),
        log_level = %config.logging.level,
        log_format = %config.logging.format,
        "streamseed starting"
    );

    tokio::fs::create_dir_all(&config.media.root)
        .await
        .context(format!(
            "Failed to create media root: {}",
            config.media.root.display()
        ))?;

    let cancel = CancellationToken::new();
    let engine = Arc::new(LocalEngine::new(&config.media.root));
    let media = MediaStore::new(&config.media.root);
    let bus = EventBus::new();

    // Controller owns all pause/resume state
    let controller = Controller::new(
        Arc::clone(&engine),
        media.clone(),
        bus.clone(),
        ControllerSettings::from(&config),
        cancel.clone(),
    );
    let (handle, controller_task) = spawn(controller);

    let poller_task = spawn_stats_poller(
        Arc::clone(&engine),
        bus.clone(),
        config.schedule.stats_interval(),
        cancel.clone(),
    );

    info!(
        interval_seconds = config.schedule.stats_interval_secs,
        "Stats poller started"
    );

    let rollout_task = {
        let handle = handle.clone();
        let cancel = cancel.clone();
        let spacing = config.schedule.rollout_spacing();
        tokio::spawn(async move {
            let mut rng = StdRng::from_os_rng();
            run_rollout(&media, &handle, spacing, &mut rng, &cancel).await;
        })
    };

    // Cancel everything on Ctrl+C or SIGTERM
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    // Build the router with middleware
    let state = Arc::new(AppState::new(config.clone(), handle, bus));
    let app = build_router(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG))
                )
        );

    // Start HTTP server(s)
    let tcp_handle = if let Some(port) = config.server.port {
        let addr = SocketAddr::new(config.server.host, port);
        info!(address = %addr, "Starting TCP listener");

        let listener = TcpListener::bind(addr).await
            .context(format!("Failed to bind TCP listener to {}", addr))?;

        info!(address = %addr, "TCP listener bound successfully");

        let app_clone = app.clone();
        let shutdown = cancel.clone();
        Some(tokio::spawn(async move {
            serve(
                listener,
                app_clone.into_make_service_with_connect_info::<SocketAddr>()
            )
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("TCP server error")
        }))
    } else {
        None
    };

    let unix_handle = if let Some(unix_socket) = &config.server.unix_socket {
        info!(path = %unix_socket.display(), "Starting Unix socket listener");

        // Remove existing socket file if it exists
        if unix_socket.exists() {
            std::fs::remove_file(unix_socket)
                .context(format!("Failed to remove existing Unix socket: {}", unix_socket.display()))?;
        }

        let listener = UnixListener::bind(unix_socket)
            .context(format!("Failed to bind Unix socket listener to {}", unix_socket.display()))?;

        info!(path = %unix_socket.display(), "Unix socket listener bound successfully");

        let mut make_service = app.into_make_service();
        let shutdown = cancel.clone();
        Some(tokio::spawn(async move {
            use tower::Service;

            loop {
                let (socket, _remote_addr) = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "Failed to accept Unix socket connection");
                            continue;
                        }
                    },
                };

                let tower_service = match make_service.call(&socket).await {
                    Ok(svc) => svc,
                    Err(infallible) => match infallible {},
                };

                tokio::spawn(async move {
                    let socket = hyper_util::rt::TokioIo::new(socket);

                    let hyper_service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                        tower_service.clone().call(request)
                    });

                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                        .serve_connection_with_upgrades(socket, hyper_service)
                        .await
                    {
                        error!(error = %err, "Error serving Unix socket connection");
                    }
                });
            }

            Ok::<(), anyhow::Error>(())
        }))
    } else {
        None
    };

    info!("HTTP server(s) started, waiting for shutdown signal");

    // Wait for the servers to complete (if they exist)
    match (tcp_handle, unix_handle) {
        (Some(tcp), Some(unix)) => {
            let (tcp, unix) = tokio::join!(tcp, unix);
            report_server("TCP", tcp);
            report_server("Unix socket", unix);
        }
        (Some(tcp), None) => report_server("TCP", tcp.await),
        (None, Some(unix)) => report_server("Unix socket", unix.await),
        (None, None) => {
            error!("No listeners configured");
            bail!("No listeners configured");
        }
    }

    // Servers only stop once the token is cancelled; make sure of it
    cancel.cancel();

    for (name, task) in [
        ("controller", controller_task),
        ("stats poller", poller_task),
        ("rollout", rollout_task),
    ] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Background task failed");
        }
    }

    info!("Shutting down gracefully");

    Ok(())
}

fn report_server(name: &str, result: Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(server = name, error = %e, "Server failed"),
        Err(e) => error!(server = name, error = %e, "Server task failed"),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
