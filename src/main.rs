use std::sync::Arc;
use std::time::Duration;

use axum::{error_handling::HandleErrorLayer, http::StatusCode};
use tower::{BoxError, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mentor_scheduling_service::{
    client::{HttpLedgerClient, HttpPaymentClient, WebhookNotifier},
    create_router,
    ports::{
        simulated::{LoggingLedger, LoggingNotifier, SimulatedPayments},
        LedgerPort, NotificationPort, PaymentPort, Ports,
    },
    services::database::create_database_service,
    AppState, ServiceConfig, SystemClock,
};

// Error handler
async fn handle_error(error: BoxError) -> (StatusCode, String) {
    if error.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            "Request took too long".to_string(),
        )
    } else if error.is::<tower::load_shed::error::Overloaded>() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service is overloaded, try again later".to_string(),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", error),
        )
    }
}

fn build_ports(config: &ServiceConfig) -> Ports {
    let key = config.payment_api_key.as_str();
    let secret = config.payment_api_secret.as_str();

    let payments: Arc<dyn PaymentPort> = match (&config.payment_endpoint, config.simulate_payments) {
        (Some(endpoint), false) => Arc::new(HttpPaymentClient::new(endpoint, key, secret)),
        _ => {
            info!("Running in simulation mode: payments are approved in-process");
            Arc::new(SimulatedPayments::new())
        }
    };

    let ledger: Arc<dyn LedgerPort> = match &config.ledger_endpoint {
        Some(endpoint) if !config.simulate_payments => {
            Arc::new(HttpLedgerClient::new(endpoint, key, secret))
        }
        _ => Arc::new(LoggingLedger),
    };

    let notifier: Arc<dyn NotificationPort> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, key, secret)),
        None => {
            info!("No notification webhook configured - events are only logged");
            Arc::new(LoggingNotifier)
        }
    };

    Ports {
        payments,
        ledger,
        notifier,
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    #[cfg(feature = "sentry-monitoring")]
    let _sentry_guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        info!("Sentry error reporting enabled");
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    // Initialize the database service
    let database = match create_database_service(&config.data_dir) {
        Ok(database) => database,
        Err(err) => {
            error!("Failed to open data directory: {}", err);
            std::process::exit(1);
        }
    };
    info!("Database service initialized");

    if config.api_auth_token.is_some() {
        info!("API authentication enabled with provided token");
    } else {
        warn!("No API authentication token provided - authentication disabled");
    }

    if config.is_production {
        info!("Running in PRODUCTION mode - restricting available endpoints");
    } else {
        info!("Running in DEVELOPMENT mode - all endpoints will be available");
    }

    // Create shared application state
    let app_state = Arc::new(AppState::new(
        database,
        Arc::new(SystemClock),
        config.policy,
        build_ports(&config),
        config.api_auth_token.clone(),
    ));

    let sweep = app_state.sweeper.clone().spawn(config.sweep_interval);

    // Create router with appropriate routes based on environment
    let app = create_router(app_state, config.is_production).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_error))
            .load_shed()
            .concurrency_limit(64)
            .timeout(Duration::from_secs(10))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any)),
    );

    info!("Server listening on {}", config.bind_addr);

    // Start server
    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind to {}: {}", config.bind_addr, err);
            std::process::exit(1);
        }
    };

    // Set up signal handler for graceful shutdown
    let shutdown = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received interrupt signal, starting graceful shutdown");
            },
            _ = terminate => {
                info!("Received terminate signal, starting graceful shutdown");
            },
        }
    };

    // Start server with graceful shutdown
    info!("Server is ready to accept connections");
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {}", err);
    }

    sweep.abort();
    info!("Server has been gracefully shut down");
}
