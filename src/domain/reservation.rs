//! Connector reservations.
//!
//! One reservation slot per connector (connector 0 reserves the charge
//! point as a whole), persisted to `reservation-<connector>.json` and
//! expired lazily against the wall clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::operations::types::wire_time;
use crate::storage::{self, SharedFilesystem};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub reservation_id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    #[serde(with = "wire_time")]
    pub expiry_date: DateTime<Utc>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }

    /// Whether `id_tag` (or its parent) may consume this reservation.
    pub fn matches(&self, id_tag: &str, parent_id_tag: Option<&str>) -> bool {
        if self.id_tag == id_tag {
            return true;
        }
        match (&self.parent_id_tag, parent_id_tag) {
            (Some(own), Some(given)) => own == given,
            _ => false,
        }
    }
}

fn file_name(connector_id: u32) -> String {
    format!("reservation-{connector_id}.json")
}

/// Outcome of a `ReserveNow`, mirroring the wire statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Accepted,
    Occupied,
    Unavailable,
    Rejected,
}

pub struct ReservationService {
    fs: Option<SharedFilesystem>,
    /// Index = connector id (0 = charge point).
    slots: Vec<Option<Reservation>>,
}

impl ReservationService {
    pub fn new(fs: Option<SharedFilesystem>, connector_count: usize) -> Self {
        let mut service = Self {
            fs,
            slots: vec![None; connector_count + 1],
        };
        service.load();
        service
    }

    fn load(&mut self) {
        let Some(fs) = self.fs.clone() else { return };
        for connector_id in 0..self.slots.len() as u32 {
            let name = file_name(connector_id);
            match storage::load_json::<Reservation>(fs.as_ref(), &name) {
                Ok(Some(res)) if res.connector_id == connector_id => {
                    debug!(connector_id, reservation_id = res.reservation_id, "reservation restored");
                    self.slots[connector_id as usize] = Some(res);
                }
                Ok(None) => {}
                _ => storage::remove_silent(fs.as_ref(), &name),
            }
        }
    }

    fn persist(&self, connector_id: u32) {
        let Some(fs) = self.fs.as_ref() else { return };
        let name = file_name(connector_id);
        match &self.slots[connector_id as usize] {
            Some(res) => {
                if let Err(e) = storage::store_json(fs.as_ref(), &name, res) {
                    tracing::warn!(connector_id, error = %e, "could not persist reservation");
                }
            }
            None => storage::remove_silent(fs.as_ref(), &name),
        }
    }

    /// Unexpired reservation concerning `connector_id` (its own slot, or
    /// the charge-point-wide slot 0).
    pub fn active_for(&self, connector_id: u32, now: DateTime<Utc>) -> Option<&Reservation> {
        let own = self.slots.get(connector_id as usize)?.as_ref();
        own.filter(|res| !res.is_expired(now)).or_else(|| {
            self.slots
                .first()?
                .as_ref()
                .filter(|res| connector_id != 0 && !res.is_expired(now))
        })
    }

    pub fn by_id(&self, reservation_id: i32) -> Option<&Reservation> {
        self.slots
            .iter()
            .flatten()
            .find(|res| res.reservation_id == reservation_id)
    }

    /// Install or update a reservation (`ReserveNow` with the same
    /// `reservationId` replaces in place).
    pub fn reserve(&mut self, reservation: Reservation) -> ReserveOutcome {
        let connector_id = reservation.connector_id as usize;
        if connector_id >= self.slots.len() {
            return ReserveOutcome::Rejected;
        }
        if let Some(existing) = &self.slots[connector_id] {
            if existing.reservation_id != reservation.reservation_id {
                return ReserveOutcome::Occupied;
            }
        }
        info!(
            connector_id,
            reservation_id = reservation.reservation_id,
            "reservation installed"
        );
        self.slots[connector_id] = Some(reservation);
        self.persist(connector_id as u32);
        ReserveOutcome::Accepted
    }

    /// `CancelReservation`; `true` if the id was known.
    pub fn cancel(&mut self, reservation_id: i32) -> bool {
        for connector_id in 0..self.slots.len() {
            let matched = self.slots[connector_id]
                .as_ref()
                .map(|res| res.reservation_id == reservation_id)
                .unwrap_or(false);
            if matched {
                self.slots[connector_id] = None;
                self.persist(connector_id as u32);
                return true;
            }
        }
        false
    }

    /// Consume the reservation satisfied by a starting transaction.
    pub fn consume(&mut self, reservation_id: i32) {
        self.cancel(reservation_id);
    }

    /// Drop expired reservations.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        for connector_id in 0..self.slots.len() {
            let expired = self.slots[connector_id]
                .as_ref()
                .map(|res| res.is_expired(now))
                .unwrap_or(false);
            if expired {
                debug!(connector_id, "reservation expired");
                self.slots[connector_id] = None;
                self.persist(connector_id as u32);
            }
        }
    }
}
