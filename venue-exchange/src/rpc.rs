//! C6: the exchange RPC surface (spec.md §4.6).
//!
//! A thin `tonic` service wrapping the store (C1) and the two
//! registries (C4). The streaming handlers follow the same
//! select-on-context-done-vs-next-item shape `original_source`'s
//! `grpc.go` uses, translated onto `tokio_stream::wrappers::ReceiverStream`
//! plus a cleanup step once the stream ends.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

use venue_proto::exchange_server::Exchange;
use venue_proto::{BrokerId, CancelResult, Deal, DealId, Ohlcv};

use crate::registry::{CandleRegistry, FillRegistry};
use crate::store::ExchangeStore;
use crate::types::NewOrder;
use std::str::FromStr;
use std::sync::Arc;
use venue_proto::Side;

pub struct ExchangeService {
    store: Arc<dyn ExchangeStore>,
    candle_registry: Arc<CandleRegistry>,
    fill_registry: Arc<FillRegistry>,
}

impl ExchangeService {
    pub fn new(
        store: Arc<dyn ExchangeStore>,
        candle_registry: Arc<CandleRegistry>,
        fill_registry: Arc<FillRegistry>,
    ) -> Self {
        Self {
            store,
            candle_registry,
            fill_registry,
        }
    }
}

#[tonic::async_trait]
impl Exchange for ExchangeService {
    #[instrument(skip(self, request))]
    async fn create(&self, request: Request<Deal>) -> Result<Response<DealId>, Status> {
        let deal = request.into_inner();
        let side = Side::from_str(&deal.r#type)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let order = NewOrder {
            broker_id: deal.broker_id,
            client_id: deal.client_id,
            ticker: deal.ticker,
            requested_volume: deal.volume,
            submit_time: deal.time as i64,
            limit_price: deal.price as f64,
            side,
        };

        let order_id = self.store.add_order(order).await?;
        info!(order_id, "order created");
        Ok(Response::new(DealId { id: order_id }))
    }

    #[instrument(skip(self, request))]
    async fn cancel(&self, request: Request<DealId>) -> Result<Response<CancelResult>, Status> {
        let order_id = request.into_inner().id;
        // spec.md §9: any non-error completion is reported as success,
        // even if the order never existed.
        self.store.delete_order(order_id).await?;
        Ok(Response::new(CancelResult { success: true }))
    }

    type StatisticStream = Pin<Box<dyn Stream<Item = Result<Ohlcv, Status>> + Send + 'static>>;

    #[instrument(skip(self, request))]
    async fn statistic(
        &self,
        request: Request<BrokerId>,
    ) -> Result<Response<Self::StatisticStream>, Status> {
        let broker_id = request.into_inner().id;
        let (sub_id, rx) = self.candle_registry.subscribe();
        info!(broker_id, "candle subscriber connected");

        let registry = self.candle_registry.clone();
        let stream: Pin<Box<dyn Stream<Item = Result<Ohlcv, Status>> + Send>> =
            Box::pin(ReceiverStream::new(rx).map(Ok));
        let guarded = GuardedStream::new(stream, move || registry.unsubscribe(sub_id));

        Ok(Response::new(Box::pin(guarded)))
    }

    type ResultsStream = Pin<Box<dyn Stream<Item = Result<Deal, Status>> + Send + 'static>>;

    #[instrument(skip(self, request))]
    async fn results(
        &self,
        request: Request<BrokerId>,
    ) -> Result<Response<Self::ResultsStream>, Status> {
        let broker_id = request.into_inner().id;
        let rx = self.fill_registry.subscribe(broker_id);
        info!(broker_id, "fill subscriber connected");

        let store = self.store.clone();
        let registry = self.fill_registry.clone();
        let stream: Pin<Box<dyn Stream<Item = Result<Deal, Status>> + Send>> =
            Box::pin(ReceiverStream::new(rx).then(move |deal: Deal| {
                let store = store.clone();
                async move {
                    if let Err(e) = store.mark_deal_shipped(deal.id).await {
                        warn!(deal_id = deal.id, error = %e, "failed to mark deal shipped");
                    }
                    Ok(deal)
                }
            }));
        let guarded = GuardedStream::new(stream, move || registry.unsubscribe(broker_id));

        Ok(Response::new(Box::pin(guarded)))
    }
}

/// Wraps a stream so that, on drop (the only reliable "the RPC send loop
/// ended, for whatever reason" signal `tonic` gives us), the subscriber
/// is removed from its registry - the "deferred cleanup on all exit
/// paths" spec.md §5 requires, without Go's `defer`.
struct GuardedStream<S, F: FnMut()> {
    inner: S,
    cleanup: Option<F>,
}

impl<S, F: FnMut()> GuardedStream<S, F> {
    fn new(inner: S, cleanup: F) -> Self {
        Self {
            inner,
            cleanup: Some(cleanup),
        }
    }
}

impl<S: Stream + Unpin, F: FnMut()> Stream for GuardedStream<S, F> {
    type Item = S::Item;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S, F: FnMut()> Drop for GuardedStream<S, F> {
    fn drop(&mut self) {
        if let Some(mut cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}
