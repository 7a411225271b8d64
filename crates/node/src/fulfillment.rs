//! Demo order fulfillment: stock is reserved through a command round trip,
//! then stock and payment are committed together in a two-phase commit,
//! then the order is confirmed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::TransactionId;
use invocation::{
    Command, CommandContext, CommandHandler, CommandInvoker, HandlerError, Reply, ResponseEvent,
};
use saga::{
    CommandStep, ParticipantError, SagaContext, SagaDefinition, SagaStep, StepError,
    TwoPhaseCommitParticipant, TwoPhaseCommitStep,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SAGA_NAME: &str = "order-fulfillment";
pub const ORDER_KEY: &str = "order";
pub const RESERVE_STEP: &str = "reserve-stock";
pub const RELEASE_STEP: &str = "release-stock";
pub const SETTLE_STEP: &str = "settle-order";
pub const REFUND_STEP: &str = "refund-order";
pub const CONFIRM_STEP: &str = "confirm-order";

/// Context key holding the settle step's transaction id.
pub fn transaction_key() -> String {
    format!("{SETTLE_STEP}.transaction_id")
}

/// An order to fulfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    pub customer_id: String,
    pub sku: String,
    pub quantity: u32,
    pub amount_cents: u64,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.order_id.trim().is_empty() {
            return Err("order id is required".to_string());
        }
        if self.customer_id.trim().is_empty() {
            return Err("customer id is required".to_string());
        }
        if self.quantity == 0 {
            return Err(format!("quantity must be positive for order {}", self.order_id));
        }
        if self.amount_cents == 0 {
            return Err(format!("amount must be positive for order {}", self.order_id));
        }
        Ok(())
    }
}

// Commands and replies

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveStock {
    pub order_id: String,
    pub sku: String,
    pub quantity: u32,
}

impl Command for ReserveStock {
    const NAME: &'static str = "ReserveStock";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub reservation_id: String,
    pub sku: String,
    pub quantity: u32,
}

impl ResponseEvent for StockReserved {
    const EVENT_TYPE: &'static str = "StockReserved";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub reservation_id: String,
}

impl Command for ReleaseStock {
    const NAME: &'static str = "ReleaseStock";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub reservation_id: String,
    /// False when the reservation was already gone.
    pub released: bool,
}

impl ResponseEvent for StockReleased {
    const EVENT_TYPE: &'static str = "StockReleased";
}

// Inventory

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: u32,
        available: u32,
    },

    #[error("unknown reservation {0}")]
    UnknownReservation(String),

    #[error("reservation {0} is already locked by another transaction")]
    ReservationLocked(String),

    #[error("transaction {0} holds no reservation")]
    UnknownTransaction(TransactionId),
}

impl InventoryError {
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            InventoryError::UnknownReservation(_) => "UNKNOWN_RESERVATION",
            InventoryError::ReservationLocked(_) => "RESERVATION_LOCKED",
            InventoryError::UnknownTransaction(_) => "UNKNOWN_TRANSACTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reservation {
    sku: String,
    quantity: u32,
}

#[derive(Debug, Default)]
struct InventoryState {
    available: HashMap<String, u32>,
    reservations: HashMap<String, Reservation>,
    locks: HashMap<TransactionId, String>,
    shipped: HashMap<String, u32>,
}

/// Stock levels, reservations and shipped units. Clones share state.
///
/// A reservation moves units out of `available`. Committing a transaction
/// that locked the reservation ships the units; releasing it puts them back.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    state: Arc<RwLock<InventoryState>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restock(&self, sku: impl Into<String>, quantity: u32) {
        *self.write().available.entry(sku.into()).or_default() += quantity;
    }

    pub fn available(&self, sku: &str) -> u32 {
        self.read().available.get(sku).copied().unwrap_or_default()
    }

    pub fn shipped(&self, sku: &str) -> u32 {
        self.read().shipped.get(sku).copied().unwrap_or_default()
    }

    pub fn reservation_count(&self) -> usize {
        self.read().reservations.len()
    }

    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        self.read().reservations.contains_key(reservation_id)
    }

    /// Reserves units for an order. Reserving the same order twice returns
    /// the existing reservation.
    pub fn reserve(
        &self,
        order_id: &str,
        sku: &str,
        quantity: u32,
    ) -> Result<String, InventoryError> {
        let reservation_id = format!("res-{order_id}");
        let mut state = self.write();
        if state.reservations.contains_key(&reservation_id) {
            return Ok(reservation_id);
        }

        let available = state.available.get(sku).copied().unwrap_or_default();
        if available < quantity {
            return Err(InventoryError::InsufficientStock {
                sku: sku.to_string(),
                requested: quantity,
                available,
            });
        }

        state.available.insert(sku.to_string(), available - quantity);
        state.reservations.insert(
            reservation_id.clone(),
            Reservation {
                sku: sku.to_string(),
                quantity,
            },
        );
        Ok(reservation_id)
    }

    /// Returns reserved units to stock. False when nothing was reserved.
    pub fn release(&self, reservation_id: &str) -> bool {
        let mut state = self.write();
        let Some(reservation) = state.reservations.remove(reservation_id) else {
            return false;
        };
        state.locks.retain(|_, held| held.as_str() != reservation_id);
        *state.available.entry(reservation.sku).or_default() += reservation.quantity;
        true
    }

    /// Puts shipped units back on the shelf.
    pub fn return_shipped(&self, sku: &str, quantity: u32) {
        let mut state = self.write();
        let shipped = state.shipped.entry(sku.to_string()).or_default();
        let returned = quantity.min(*shipped);
        *shipped -= returned;
        *state.available.entry(sku.to_string()).or_default() += returned;
    }

    fn lock(&self, reservation_id: &str, tx: &TransactionId) -> Result<(), InventoryError> {
        let mut state = self.write();
        if !state.reservations.contains_key(reservation_id) {
            return Err(InventoryError::UnknownReservation(reservation_id.to_string()));
        }
        if state
            .locks
            .iter()
            .any(|(holder, held)| held.as_str() == reservation_id && holder != tx)
        {
            return Err(InventoryError::ReservationLocked(reservation_id.to_string()));
        }
        state.locks.insert(tx.clone(), reservation_id.to_string());
        Ok(())
    }

    fn ship(&self, tx: &TransactionId) -> Result<(), InventoryError> {
        let mut state = self.write();
        let reservation_id = state
            .locks
            .remove(tx)
            .ok_or_else(|| InventoryError::UnknownTransaction(tx.clone()))?;
        let reservation = state
            .reservations
            .remove(&reservation_id)
            .ok_or(InventoryError::UnknownReservation(reservation_id))?;
        *state.shipped.entry(reservation.sku).or_default() += reservation.quantity;
        Ok(())
    }

    fn unlock(&self, tx: &TransactionId) {
        self.write().locks.remove(tx);
    }

    fn read(&self) -> RwLockReadGuard<'_, InventoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InventoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// Payments

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient funds for {customer}: requested {requested}, balance {balance}")]
    InsufficientFunds {
        customer: String,
        requested: u64,
        balance: u64,
    },

    #[error("transaction {0} holds no funds")]
    UnknownHold(TransactionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hold {
    customer: String,
    amount: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<String, u64>,
    holds: HashMap<TransactionId, Hold>,
    captured: u64,
}

/// Customer balances with per-transaction holds. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    state: Arc<RwLock<LedgerState>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, customer: impl Into<String>, amount: u64) {
        *self.write().balances.entry(customer.into()).or_default() += amount;
    }

    pub fn balance(&self, customer: &str) -> u64 {
        self.read().balances.get(customer).copied().unwrap_or_default()
    }

    /// Total captured across all customers.
    pub fn captured(&self) -> u64 {
        self.read().captured
    }

    pub fn hold_count(&self) -> usize {
        self.read().holds.len()
    }

    /// Moves `amount` of the customer's balance into a hold for `tx`.
    fn hold(&self, tx: &TransactionId, customer: &str, amount: u64) -> Result<(), LedgerError> {
        let mut state = self.write();
        if state.holds.contains_key(tx) {
            return Ok(());
        }
        let balance = state.balances.get(customer).copied().unwrap_or_default();
        if balance < amount {
            return Err(LedgerError::InsufficientFunds {
                customer: customer.to_string(),
                requested: amount,
                balance,
            });
        }
        state.balances.insert(customer.to_string(), balance - amount);
        state.holds.insert(
            tx.clone(),
            Hold {
                customer: customer.to_string(),
                amount,
            },
        );
        Ok(())
    }

    fn capture(&self, tx: &TransactionId) -> Result<(), LedgerError> {
        let mut state = self.write();
        let hold = state
            .holds
            .remove(tx)
            .ok_or_else(|| LedgerError::UnknownHold(tx.clone()))?;
        state.captured += hold.amount;
        Ok(())
    }

    /// Returns held funds to the customer. No-op for an unknown transaction.
    fn release_hold(&self, tx: &TransactionId) {
        let mut state = self.write();
        if let Some(hold) = state.holds.remove(tx) {
            *state.balances.entry(hold.customer).or_default() += hold.amount;
        }
    }

    /// Credits back a captured amount.
    pub fn refund(&self, customer: &str, amount: u64) {
        let mut state = self.write();
        let refunded = amount.min(state.captured);
        state.captured -= refunded;
        *state.balances.entry(customer.to_string()).or_default() += refunded;
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// Confirmed orders

/// A confirmed order as recorded by the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedOrder {
    pub order_id: String,
    pub reservation_id: String,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Default)]
struct OrderBookState {
    confirmed: HashMap<String, ConfirmedOrder>,
    fail_on_confirm: bool,
}

/// Confirmed orders. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    state: Arc<RwLock<OrderBookState>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes confirmations fail until switched off.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_confirm = fail;
    }

    pub fn get(&self, order_id: &str) -> Option<ConfirmedOrder> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .confirmed
            .get(order_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .confirmed
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn confirm(&self, order: ConfirmedOrder) -> Result<(), String> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_confirm {
            return Err(format!("order book rejected {}", order.order_id));
        }
        state.confirmed.insert(order.order_id.clone(), order);
        Ok(())
    }
}

// Command handlers

pub struct ReserveStockHandler {
    inventory: Inventory,
}

impl ReserveStockHandler {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl CommandHandler<ReserveStock> for ReserveStockHandler {
    #[tracing::instrument(skip(self, ctx), fields(order_id = %command.order_id, sku = %command.sku))]
    async fn handle(
        &self,
        command: ReserveStock,
        ctx: &CommandContext,
    ) -> Result<Reply, HandlerError> {
        let reservation_id = self
            .inventory
            .reserve(&command.order_id, &command.sku, command.quantity)
            .map_err(|e| HandlerError::new(e.code(), e.to_string()))?;

        tracing::info!(
            correlation_id = %ctx.correlation_id(),
            %reservation_id,
            quantity = command.quantity,
            "stock reserved"
        );
        Ok(Reply::event(&StockReserved {
            reservation_id: reservation_id.clone(),
            sku: command.sku,
            quantity: command.quantity,
        })?
        .with_aggregate_id(reservation_id))
    }
}

pub struct ReleaseStockHandler {
    inventory: Inventory,
}

impl ReleaseStockHandler {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl CommandHandler<ReleaseStock> for ReleaseStockHandler {
    async fn handle(
        &self,
        command: ReleaseStock,
        _ctx: &CommandContext,
    ) -> Result<Reply, HandlerError> {
        let released = self.inventory.release(&command.reservation_id);
        tracing::info!(reservation_id = %command.reservation_id, released, "stock released");
        Ok(Reply::event(&StockReleased {
            reservation_id: command.reservation_id,
            released,
        })?)
    }
}

// Two-phase commit participants

/// Ships the units of one reservation.
pub struct StockParticipant {
    inventory: Inventory,
    reservation_id: String,
}

impl StockParticipant {
    pub fn new(inventory: Inventory, reservation_id: impl Into<String>) -> Self {
        Self {
            inventory,
            reservation_id: reservation_id.into(),
        }
    }
}

#[async_trait]
impl TwoPhaseCommitParticipant for StockParticipant {
    fn id(&self) -> &str {
        "inventory"
    }

    async fn prepare(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.inventory
            .lock(&self.reservation_id, tx)
            .map_err(|e| ParticipantError::new(e.to_string()))
    }

    async fn commit(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.inventory
            .ship(tx)
            .map_err(|e| ParticipantError::new(e.to_string()))
    }

    async fn abort(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.inventory.unlock(tx);
        Ok(())
    }
}

/// Charges a customer.
pub struct PaymentParticipant {
    ledger: Ledger,
    customer_id: String,
    amount_cents: u64,
}

impl PaymentParticipant {
    pub fn new(ledger: Ledger, customer_id: impl Into<String>, amount_cents: u64) -> Self {
        Self {
            ledger,
            customer_id: customer_id.into(),
            amount_cents,
        }
    }
}

#[async_trait]
impl TwoPhaseCommitParticipant for PaymentParticipant {
    fn id(&self) -> &str {
        "payment"
    }

    async fn prepare(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.ledger
            .hold(tx, &self.customer_id, self.amount_cents)
            .map_err(|e| ParticipantError::new(e.to_string()))
    }

    async fn commit(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.ledger
            .capture(tx)
            .map_err(|e| ParticipantError::new(e.to_string()))
    }

    async fn abort(&self, tx: &TransactionId) -> Result<(), ParticipantError> {
        self.ledger.release_hold(tx);
        Ok(())
    }
}

// Local steps

fn order_in(ctx: &SagaContext) -> Result<&OrderRequest, StepError> {
    ctx.get::<OrderRequest>(ORDER_KEY)
        .ok_or_else(|| StepError::MissingContext(ORDER_KEY.to_string()))
}

fn reservation_in(ctx: &SagaContext) -> Result<&StockReserved, StepError> {
    ctx.get::<StockReserved>(RESERVE_STEP)
        .ok_or_else(|| StepError::MissingContext(RESERVE_STEP.to_string()))
}

/// Undoes a settled order: refunds the charge and returns shipped units.
struct RefundOrder {
    inventory: Inventory,
    ledger: Ledger,
}

#[async_trait]
impl SagaStep for RefundOrder {
    fn name(&self) -> &str {
        REFUND_STEP
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), StepError> {
        let order = order_in(ctx)?;
        self.ledger.refund(&order.customer_id, order.amount_cents);
        self.inventory.return_shipped(&order.sku, order.quantity);
        tracing::info!(order_id = %order.order_id, "order refunded");
        Ok(())
    }
}

/// Records the order as confirmed. Nothing to undo: it is the last step.
struct ConfirmOrder {
    orders: OrderBook,
}

#[async_trait]
impl SagaStep for ConfirmOrder {
    fn name(&self) -> &str {
        CONFIRM_STEP
    }

    async fn execute(&self, ctx: &mut SagaContext) -> Result<(), StepError> {
        let key = transaction_key();
        let transaction_id = ctx
            .get::<TransactionId>(&key)
            .ok_or(StepError::MissingContext(key))?
            .clone();
        let confirmed = ConfirmedOrder {
            order_id: order_in(ctx)?.order_id.clone(),
            reservation_id: reservation_in(ctx)?.reservation_id.clone(),
            transaction_id,
        };
        self.orders.confirm(confirmed).map_err(StepError::Failed)
    }

    fn has_compensation(&self) -> bool {
        false
    }
}

/// Builds the fulfillment saga over the given stores.
pub fn definition(
    invoker: CommandInvoker,
    inventory: Inventory,
    ledger: Ledger,
    orders: OrderBook,
) -> saga::Result<SagaDefinition> {
    let release = CommandStep::<ReleaseStock, StockReleased>::new(
        RELEASE_STEP,
        invoker.clone(),
        |ctx| {
            Ok(ReleaseStock {
                reservation_id: reservation_in(ctx)?.reservation_id.clone(),
            })
        },
    );

    let reserve = CommandStep::<ReserveStock, StockReserved>::new(RESERVE_STEP, invoker, |ctx| {
        let order = order_in(ctx)?;
        Ok(ReserveStock {
            order_id: order.order_id.clone(),
            sku: order.sku.clone(),
            quantity: order.quantity,
        })
    })
    .compensate_with(Arc::new(release));

    let settle = TwoPhaseCommitStep::new(SETTLE_STEP, {
        let inventory = inventory.clone();
        let ledger = ledger.clone();
        move |ctx: &SagaContext| {
            let order = order_in(ctx)?;
            let reserved = reservation_in(ctx)?;
            Ok(vec![
                Arc::new(StockParticipant::new(
                    inventory.clone(),
                    reserved.reservation_id.clone(),
                )) as Arc<dyn TwoPhaseCommitParticipant>,
                Arc::new(PaymentParticipant::new(
                    ledger.clone(),
                    order.customer_id.clone(),
                    order.amount_cents,
                )) as Arc<dyn TwoPhaseCommitParticipant>,
            ])
        }
    })
    .compensate_with(Arc::new(RefundOrder { inventory, ledger }));

    SagaDefinition::builder(SAGA_NAME)
        .step(reserve)
        .step(settle)
        .step(ConfirmOrder { orders })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_request() -> OrderRequest {
        OrderRequest {
            order_id: "o-1".to_string(),
            customer_id: "alice".to_string(),
            sku: "WIDGET".to_string(),
            quantity: 2,
            amount_cents: 1_000,
        }
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(order_request().validate().is_ok());

        let mut order = order_request();
        order.quantity = 0;
        assert!(order.validate().is_err());

        let mut order = order_request();
        order.customer_id = " ".to_string();
        assert!(order.validate().is_err());

        let mut order = order_request();
        order.amount_cents = 0;
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_reserve_and_release_restore_stock() {
        let inventory = Inventory::new();
        inventory.restock("WIDGET", 5);

        let id = inventory.reserve("o-1", "WIDGET", 3).unwrap();
        assert_eq!(id, "res-o-1");
        assert_eq!(inventory.available("WIDGET"), 2);
        // Same order again returns the same reservation.
        assert_eq!(inventory.reserve("o-1", "WIDGET", 3).unwrap(), id);
        assert_eq!(inventory.available("WIDGET"), 2);

        assert!(inventory.release(&id));
        assert!(!inventory.release(&id));
        assert_eq!(inventory.available("WIDGET"), 5);
    }

    #[test]
    fn test_reserve_fails_on_insufficient_stock() {
        let inventory = Inventory::new();
        inventory.restock("WIDGET", 1);

        let err = inventory.reserve("o-1", "WIDGET", 2).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_STOCK");
        assert_eq!(inventory.available("WIDGET"), 1);
        assert_eq!(inventory.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_stock_participant_ships_on_commit() {
        let inventory = Inventory::new();
        inventory.restock("WIDGET", 5);
        let id = inventory.reserve("o-1", "WIDGET", 2).unwrap();
        let participant = StockParticipant::new(inventory.clone(), id.clone());
        let tx = TransactionId::new();

        participant.prepare(&tx).await.unwrap();
        // A second transaction cannot lock the same reservation.
        assert!(inventory.lock(&id, &TransactionId::new()).is_err());
        participant.commit(&tx).await.unwrap();

        assert_eq!(inventory.shipped("WIDGET"), 2);
        assert!(!inventory.has_reservation(&id));

        inventory.return_shipped("WIDGET", 2);
        assert_eq!(inventory.shipped("WIDGET"), 0);
        assert_eq!(inventory.available("WIDGET"), 5);
    }

    #[tokio::test]
    async fn test_stock_participant_prepare_fails_without_reservation() {
        let participant = StockParticipant::new(Inventory::new(), "res-missing");
        assert!(participant.prepare(&TransactionId::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_payment_participant_hold_capture_and_abort() {
        let ledger = Ledger::new();
        ledger.deposit("alice", 1_500);
        let participant = PaymentParticipant::new(ledger.clone(), "alice", 1_000);

        let aborted = TransactionId::new();
        participant.prepare(&aborted).await.unwrap();
        assert_eq!(ledger.balance("alice"), 500);
        participant.abort(&aborted).await.unwrap();
        assert_eq!(ledger.balance("alice"), 1_500);
        assert_eq!(ledger.hold_count(), 0);

        let committed = TransactionId::new();
        participant.prepare(&committed).await.unwrap();
        participant.commit(&committed).await.unwrap();
        assert_eq!(ledger.balance("alice"), 500);
        assert_eq!(ledger.captured(), 1_000);

        ledger.refund("alice", 1_000);
        assert_eq!(ledger.balance("alice"), 1_500);
        assert_eq!(ledger.captured(), 0);
    }

    #[tokio::test]
    async fn test_payment_participant_rejects_insufficient_funds() {
        let ledger = Ledger::new();
        ledger.deposit("bob", 10);
        let participant = PaymentParticipant::new(ledger.clone(), "bob", 1_000);

        let err = participant.prepare(&TransactionId::new()).await.unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));
        assert_eq!(ledger.balance("bob"), 10);
    }

    #[test]
    fn test_order_book_failure_switch() {
        let orders = OrderBook::new();
        let confirmed = ConfirmedOrder {
            order_id: "o-1".to_string(),
            reservation_id: "res-o-1".to_string(),
            transaction_id: TransactionId::from("tx-1"),
        };

        orders.set_fail_on_confirm(true);
        assert!(orders.confirm(confirmed.clone()).is_err());
        assert!(orders.is_empty());

        orders.set_fail_on_confirm(false);
        orders.confirm(confirmed.clone()).unwrap();
        assert_eq!(orders.get("o-1"), Some(confirmed));
    }
}
