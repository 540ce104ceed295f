use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wellness_sms::api::{self, AppState};
use wellness_sms::carrier::TwilioCarrier;
use wellness_sms::config::{CarrierConfig, ServiceConfig};
use wellness_sms::dispatch::Dispatcher;
use wellness_sms::scheduler::{self, CampaignEngine};
use wellness_sms::store::LibSqlBackend;
use wellness_sms::webhook::{self, InboundProcessor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let service = ServiceConfig::from_env();
    let carrier_config = CarrierConfig::from_env().map_err(|e| {
        anyhow::anyhow!("Carrier configuration error: {e}. Set TWILIO_ACCOUNT_SID and TWILIO_AUTH_TOKEN.")
    })?;

    if service.api_token.is_none() {
        warn!("SMS_API_TOKEN not set; operator API is unauthenticated");
    }

    let store = Arc::new(LibSqlBackend::new_local(Path::new(&service.db_path)).await?);
    let carrier = Arc::new(TwilioCarrier::new(carrier_config));
    let dispatcher = Dispatcher::new(store.clone(), carrier);
    let engine = CampaignEngine::new(store.clone(), dispatcher.clone(), service.due_window);
    let processor = InboundProcessor::new(
        store.clone(),
        dispatcher.clone(),
        service.auto_reply_body.clone(),
    );

    let _tick_loop = scheduler::spawn_tick_loop(engine.clone(), service.tick_interval);
    info!(interval = ?service.tick_interval, "Campaign tick loop started");

    let app = api::routes(AppState {
        store,
        dispatcher,
        engine,
        api_token: service.api_token.clone(),
    })
    .merge(webhook::routes(processor));

    let addr = format!("0.0.0.0:{}", service.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Wellness SMS service listening");
    eprintln!("wellness-sms listening on {addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
