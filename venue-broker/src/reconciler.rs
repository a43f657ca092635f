//! C7: the broker deal processor (spec.md §4.7).
//!
//! Connects to the exchange's `Results` stream for one `broker_id` and
//! runs the reconciliation transaction (C8 position projection happens
//! inside `BrokerStore::reconcile_fill`) for every fill received. A
//! failed fill is logged and the reader continues with the next one -
//! spec.md §7's "surface the error to the stream reader which logs and
//! continues" - matching the teacher's pattern of never letting one bad
//! event take down a whole worker (`engine::generic::Engine::run`'s
//! `continue` branches).

use std::sync::Arc;

use tonic::transport::Channel;
use tracing::{error, info, instrument};
use venue_proto::exchange_client::ExchangeClient;
use venue_proto::BrokerId;

use crate::store::BrokerStore;
use crate::types::IncomingFill;

pub struct DealProcessor {
    store: Arc<dyn BrokerStore>,
    broker_id: i64,
}

impl DealProcessor {
    pub fn new(store: Arc<dyn BrokerStore>, broker_id: i64) -> Self {
        Self { store, broker_id }
    }

    /// Runs until the stream ends (server shutdown, transport failure, or
    /// the process is cancelled). Does not reconnect itself; the caller
    /// is expected to retry `run` after a backoff if it returns.
    #[instrument(skip(self, client))]
    pub async fn run(&self, mut client: ExchangeClient<Channel>) -> Result<(), tonic::Status> {
        let mut stream = client
            .results(BrokerId { id: self.broker_id })
            .await?
            .into_inner();

        info!(broker_id = self.broker_id, "subscribed to results stream");

        loop {
            let message = stream.message().await;
            match message {
                Ok(Some(deal)) => {
                    let fill: IncomingFill = deal.into();
                    if let Err(e) = self.store.reconcile_fill(fill).await {
                        error!(error = %e, "reconciliation failed for incoming fill, skipping");
                    }
                }
                Ok(None) => {
                    info!("results stream closed by exchange");
                    return Ok(());
                }
                Err(status) => {
                    error!(error = %status, "results stream transport failure");
                    return Err(status);
                }
            }
        }
    }
}
