//! Charge point domain model: connectors, transactions, metering, smart
//! charging, reservations, authorization, and the lifecycle services.

pub mod authorization;
pub mod boot;
pub mod connector;
pub mod diagnostics;
pub mod firmware;
pub mod metering;
pub mod model;
pub mod reservation;
pub mod smart_charging;
pub mod transaction;
pub mod transaction_store;

pub use connector::{Connector, TxNotification};
pub use model::Model;
pub use transaction::Transaction;
pub use transaction_store::TransactionStore;

use crate::config::ConfigRegistry;
use crate::operations::operation::Outbox;
use crate::support::clock::TimeService;

use authorization::AuthorizationService;
use reservation::ReservationService;

/// Notification stream from the session machinery to the host.
pub type TxNotificationCallback = Box<dyn FnMut(u32, TxNotification)>;

/// Disjoint borrows of the model's shared services, passed into connector
/// ticks and operation handlers that would otherwise fight the borrow
/// checker over `&mut Model`.
pub struct Services<'a> {
    pub config: &'a mut ConfigRegistry,
    pub time: &'a mut TimeService,
    pub tx_store: &'a mut TransactionStore,
    pub reservations: &'a mut ReservationService,
    pub auth: &'a mut AuthorizationService,
    pub outbox: &'a mut Outbox,
    pub tx_notify: &'a mut Option<TxNotificationCallback>,
    pub boot_nr: u32,
    /// Transport connected and boot handshake through.
    pub online: bool,
    /// `BootNotification` accepted at least once this run.
    pub boot_accepted: bool,
}

impl Services<'_> {
    pub fn notify(&mut self, connector_id: u32, event: TxNotification) {
        if let Some(cb) = self.tx_notify.as_mut() {
            cb(connector_id, event);
        }
    }
}
