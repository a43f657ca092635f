//! The exchange daemon: tape reader (C2) feeding the matching engine
//! (C3/C5), fronted by the gRPC surface (C6).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use venue_bins::common::{init_logging, CommonArgs};
use venue_exchange::config::ExchangeSettings;
use venue_exchange::{CandleRegistry, ExchangeService, ExchangeStore, FillRegistry, MatchingEngine, PgExchangeStore};
use venue_proto::exchange_server::ExchangeServer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    let settings = match args.config.as_deref() {
        Some(path) => ExchangeSettings::load(path)?,
        None => ExchangeSettings::load_default()?,
    };

    let store: Arc<dyn ExchangeStore> = Arc::new(
        PgExchangeStore::connect(&settings.db.connection_string()).await?,
    );
    let candle_registry = Arc::new(CandleRegistry::new());
    let fill_registry = Arc::new(FillRegistry::new());

    let (tape_tx, tape_rx) = tokio::sync::mpsc::channel(venue_exchange::tape::TAPE_CHANNEL_CAPACITY);

    let tape_file = settings.exchange.deals_flow_file.clone();
    tokio::spawn(async move {
        if let Err(e) = venue_exchange::tape::run(&tape_file, tape_tx).await {
            tracing::error!(error = %e, "tape reader stopped");
        }
    });

    let engine = MatchingEngine::new(
        store.clone(),
        candle_registry.clone(),
        fill_registry.clone(),
        Duration::from_secs(settings.exchange.trading_interval),
    );
    tokio::spawn(async move {
        engine.run(tape_rx).await;
    });

    let addr = format!("0.0.0.0:{}", settings.http.port).parse()?;
    let service = ExchangeService::new(store, candle_registry, fill_registry);

    info!(%addr, "exchange server listening");
    Server::builder()
        .add_service(ExchangeServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
