//! The broker daemon: connects to its exchange endpoint and runs the
//! deal processor (C7) against the `Results` stream for its `broker_id`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tonic::transport::Channel;
use tracing::{error, info};

use venue_bins::common::{init_logging, CommonArgs};
use venue_broker::config::BrokerSettings;
use venue_broker::{BrokerStore, DealProcessor, PgBrokerStore};
use venue_proto::exchange_client::ExchangeClient;

/// `run` returns whenever the stream ends, by design or by transport
/// failure; a fresh connection is retried with this backoff rather than
/// treating it as fatal, matching spec.md §7's "the reconnect loop ...
/// is this binary's job, not the stream's".
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    let settings = match args.config.as_deref() {
        Some(path) => BrokerSettings::load(path)?,
        None => BrokerSettings::load_default()?,
    };

    let store: Arc<dyn BrokerStore> = Arc::new(
        PgBrokerStore::connect(&settings.db.connection_string()).await?,
    );
    let processor = DealProcessor::new(store, settings.broker.id);

    info!(
        broker_id = settings.broker.id,
        endpoint = %settings.broker.exchange_endpoint,
        "broker daemon starting"
    );

    loop {
        match ExchangeClient::connect(settings.broker.exchange_endpoint.clone()).await {
            Ok(client) => {
                if let Err(status) = processor.run(client).await {
                    error!(error = %status, "results stream ended, reconnecting");
                }
            }
            Err(e) => {
                error!(error = %e, "failed to connect to exchange, retrying");
            }
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}
