use std::sync::{Arc, Mutex};

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use stayline::config::AppConfig;
use stayline::db;
use stayline::handlers;
use stayline::services::notify::{MailgunNotifier, NoopNotifier, Notifier};
use stayline::services::payment::khalti::KhaltiGateway;
use stayline::services::payment::noop::NoopGateway;
use stayline::services::payment::PaymentGateway;
use stayline::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let gateway: Box<dyn PaymentGateway> = match config.gateway_provider.as_str() {
        "khalti" => {
            anyhow::ensure!(
                !config.khalti_secret_key.is_empty(),
                "KHALTI_SECRET_KEY must be set when GATEWAY_PROVIDER=khalti"
            );
            tracing::info!("using Khalti payment gateway ({})", config.khalti_base_url);
            Box::new(KhaltiGateway::new(
                config.khalti_secret_key.clone(),
                config.khalti_base_url.clone(),
            ))
        }
        _ => {
            tracing::warn!("using noop payment gateway; payments are not real");
            Box::new(NoopGateway)
        }
    };

    let notifier: Box<dyn Notifier> = if config.mailgun_api_key.is_empty() {
        tracing::info!("MAILGUN_API_KEY not set; notifications will only be logged");
        Box::new(NoopNotifier)
    } else {
        Box::new(MailgunNotifier::new(
            config.mailgun_api_key.clone(),
            config.mailgun_domain.clone(),
            config.mail_from.clone(),
        ))
    };

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        gateway,
        notifier,
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/bookings", post(handlers::bookings::create_booking))
        .route("/bookings", get(handlers::bookings::list_bookings))
        .route(
            "/bookings/:id/status",
            patch(handlers::bookings::update_status),
        )
        .route(
            "/bookings/:id/cancel",
            patch(handlers::bookings::cancel_booking),
        )
        .route("/payments/verify", post(handlers::payments::verify_payment))
        .route(
            "/payments/:booking_id/refund",
            post(handlers::payments::refund_payment),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
