//! Runnable node wiring correlated command invocation and sagas over the
//! in-memory transport.
//!
//! [`Node::build`] assembles the whole stack from a [`Config`]: transport,
//! subject resolver, correlation engine, invoker, a command router with the
//! demo inventory handlers bound, and a saga executor with an in-memory
//! journal. [`Node::run_fulfillment`] drives the demo order saga through it.

pub mod config;
pub mod error;
pub mod fulfillment;

use std::sync::Arc;
use std::time::Instant;

use common::{CorrelationId, TransactionId};
use correlation::EventAwaiter;
use invocation::{AsyncCommandBus, CommandInvoker, CommandRouter};
use messaging::{
    InMemoryTransport, JsonSerializer, PrefixSubjectResolver, Serializer, SubjectResolver,
    TransportEventPublisher, TransportEventSource,
};
use saga::{InMemorySagaJournal, SagaContext, SagaDefinition, SagaExecutor, SagaId};

pub use config::Config;
pub use error::{NodeError, Result};
use fulfillment::{
    Inventory, Ledger, ORDER_KEY, OrderBook, OrderRequest, RESERVE_STEP, ReleaseStock,
    ReleaseStockHandler, ReserveStock, ReserveStockHandler, StockReserved,
};

/// What a completed fulfillment left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentReceipt {
    pub order_id: String,
    pub saga_id: SagaId,
    pub reservation_id: String,
    pub transaction_id: TransactionId,
}

/// A fully wired node.
pub struct Node {
    config: Config,
    transport: InMemoryTransport,
    awaiter: EventAwaiter,
    invoker: CommandInvoker,
    router: CommandRouter,
    executor: SagaExecutor,
    journal: InMemorySagaJournal,
    fulfillment: SagaDefinition,
    inventory: Inventory,
    ledger: Ledger,
    orders: OrderBook,
}

impl Node {
    /// Wires every component and binds the command handlers.
    pub async fn build(config: Config) -> Result<Self> {
        let transport = InMemoryTransport::new();
        let resolver: Arc<dyn SubjectResolver> = Arc::new(PrefixSubjectResolver::with_prefixes(
            config.command_prefix.clone(),
            config.subject_prefix.clone(),
        ));
        let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer);

        let source = TransportEventSource::new(
            Arc::new(transport.clone()),
            resolver.clone(),
            serializer.clone(),
        );
        let awaiter = EventAwaiter::start(Arc::new(source), config.awaiter_config());

        let bus = AsyncCommandBus::new(
            Arc::new(transport.clone()),
            resolver.clone(),
            serializer.clone(),
        );
        let invoker = CommandInvoker::new(bus, awaiter.clone(), config.invoker_config());

        let events = TransportEventPublisher::new(
            Arc::new(transport.clone()),
            resolver.clone(),
            serializer.clone(),
        );
        let router = CommandRouter::new(
            Arc::new(transport.clone()),
            Arc::new(events),
            resolver,
            serializer,
        );

        let inventory = Inventory::new();
        let ledger = Ledger::new();
        let orders = OrderBook::new();
        router
            .bind::<ReserveStock, _>(ReserveStockHandler::new(inventory.clone()))
            .await?;
        router
            .bind::<ReleaseStock, _>(ReleaseStockHandler::new(inventory.clone()))
            .await?;

        let journal = InMemorySagaJournal::new();
        let executor =
            SagaExecutor::new(config.saga_config()).with_journal(Arc::new(journal.clone()));
        let fulfillment = fulfillment::definition(
            invoker.clone(),
            inventory.clone(),
            ledger.clone(),
            orders.clone(),
        )?;

        tracing::info!(
            command_prefix = %config.command_prefix,
            subject_prefix = %config.subject_prefix,
            invoke_timeout_ms = config.invoke_timeout.as_millis() as u64,
            "node started"
        );

        Ok(Self {
            config,
            transport,
            awaiter,
            invoker,
            router,
            executor,
            journal,
            fulfillment,
            inventory,
            ledger,
            orders,
        })
    }

    /// Runs the fulfillment saga for one order.
    ///
    /// On failure the saga has already been compensated; the returned
    /// [`NodeError::Saga`] carries its report.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn run_fulfillment(&self, order: OrderRequest) -> Result<FulfillmentReceipt> {
        order.validate().map_err(NodeError::InvalidOrder)?;
        let started = Instant::now();
        let order_id = order.order_id.clone();

        let mut ctx = SagaContext::new(CorrelationId::from(format!("order-{order_id}")));
        ctx.insert(ORDER_KEY, order);

        let report = match self.executor.execute(&self.fulfillment, &mut ctx).await {
            Ok(report) => report,
            Err(e) => {
                metrics::counter!("fulfillment_orders_total", "outcome" => "failed").increment(1);
                tracing::warn!(%order_id, error = %e, "fulfillment failed");
                return Err(e.into());
            }
        };

        let reservation_id = ctx
            .get::<StockReserved>(RESERVE_STEP)
            .map(|reserved| reserved.reservation_id.clone())
            .ok_or_else(|| NodeError::MissingOutput(RESERVE_STEP.to_string()))?;
        let key = fulfillment::transaction_key();
        let transaction_id = ctx
            .get::<TransactionId>(&key)
            .cloned()
            .ok_or(NodeError::MissingOutput(key))?;

        metrics::counter!("fulfillment_orders_total", "outcome" => "completed").increment(1);
        metrics::histogram!("fulfillment_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(%order_id, %reservation_id, %transaction_id, "order fulfilled");

        Ok(FulfillmentReceipt {
            order_id,
            saga_id: report.saga_id,
            reservation_id,
            transaction_id,
        })
    }

    /// Unbinds every handler, then stops the correlation engine within the
    /// configured deadline. Waiters still pending at that point fail with a
    /// stopped error.
    pub async fn shutdown(&self) -> Result<()> {
        self.router.unbind_all().await?;
        self.awaiter.stop(self.config.shutdown_deadline).await?;
        tracing::info!("node stopped");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &InMemoryTransport {
        &self.transport
    }

    pub fn awaiter(&self) -> &EventAwaiter {
        &self.awaiter
    }

    pub fn invoker(&self) -> &CommandInvoker {
        &self.invoker
    }

    pub fn journal(&self) -> &InMemorySagaJournal {
        &self.journal
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }
}
