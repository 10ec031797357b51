//! Firmware update orchestration.
//!
//! `UpdateFirmware` hands the download and installation to host hooks;
//! this service sequences them (wait for the retrieve date, download with
//! retries, wait for every connector to go idle, make the charge point
//! inoperative, install) and reports each stage through
//! `FirmwareStatusNotification`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::operations::operation::{Operation, Request};

use super::Services;

/// Wire statuses of `FirmwareStatusNotification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareStatus {
    Downloaded,
    DownloadFailed,
    Downloading,
    Idle,
    InstallationFailed,
    Installing,
    Installed,
}

/// Host-reported progress of the download hook, polled every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadProgress {
    InProgress,
    Done,
    Failed,
}

/// Host-reported progress of the installation hook, polled every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallProgress {
    InProgress,
    Done,
    Failed,
}

pub type DownloadHook = Box<dyn FnMut(&str) -> DownloadProgress>;
pub type InstallHook = Box<dyn FnMut(&str) -> InstallProgress>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    WaitingForRetrieveDate,
    Downloading,
    WaitingForIdle,
    Installing,
}

pub struct FirmwareService {
    download_hook: Option<DownloadHook>,
    install_hook: Option<InstallHook>,
    stage: Stage,
    location: String,
    retrieve_date: Option<DateTime<Utc>>,
    retries_left: i32,
    retry_interval_s: i32,
    retry_at_ms: Option<u64>,
}

impl FirmwareService {
    pub fn new() -> Self {
        Self {
            download_hook: None,
            install_hook: None,
            stage: Stage::Idle,
            location: String::new(),
            retrieve_date: None,
            retries_left: 0,
            retry_interval_s: 0,
            retry_at_ms: None,
        }
    }

    pub fn set_download_hook(&mut self, hook: DownloadHook) {
        self.download_hook = Some(hook);
    }

    pub fn set_install_hook(&mut self, hook: InstallHook) {
        self.install_hook = Some(hook);
    }

    /// `UpdateFirmware.req` received.
    pub fn schedule(
        &mut self,
        location: String,
        retrieve_date: Option<DateTime<Utc>>,
        retries: Option<i32>,
        retry_interval_s: Option<i32>,
    ) {
        info!(location = %location, ?retrieve_date, "firmware update scheduled");
        self.location = location;
        self.retrieve_date = retrieve_date;
        self.retries_left = retries.unwrap_or(1).max(1);
        self.retry_interval_s = retry_interval_s.unwrap_or(180).max(1);
        self.retry_at_ms = None;
        self.stage = Stage::WaitingForRetrieveDate;
    }

    /// While true, connectors are held inoperative.
    pub fn installation_in_progress(&self) -> bool {
        matches!(self.stage, Stage::WaitingForIdle | Stage::Installing)
    }

    /// Status for `TriggerMessage(FirmwareStatusNotification)`.
    pub fn current_status(&self) -> FirmwareStatus {
        match self.stage {
            Stage::Idle | Stage::WaitingForRetrieveDate => FirmwareStatus::Idle,
            Stage::Downloading => FirmwareStatus::Downloading,
            Stage::WaitingForIdle => FirmwareStatus::Downloaded,
            Stage::Installing => FirmwareStatus::Installing,
        }
    }

    fn report(&self, sv: &mut Services, status: FirmwareStatus) {
        sv.outbox
            .push(Request::new(Operation::FirmwareStatusNotification { status }));
    }

    /// Advance the update sequence. `all_idle` reports whether any
    /// connector still has an open transaction.
    pub fn tick(&mut self, sv: &mut Services, all_idle: bool) {
        match self.stage {
            Stage::Idle => {}
            Stage::WaitingForRetrieveDate => {
                let due = self
                    .retrieve_date
                    .map(|at| sv.time.now() >= at)
                    .unwrap_or(true);
                let retry_ok = self
                    .retry_at_ms
                    .map(|at| sv.time.uptime_ms() >= at)
                    .unwrap_or(true);
                if due && retry_ok {
                    if self.download_hook.is_none() {
                        warn!("no firmware download hook registered, aborting update");
                        self.stage = Stage::Idle;
                        self.report(sv, FirmwareStatus::DownloadFailed);
                        return;
                    }
                    self.stage = Stage::Downloading;
                    self.report(sv, FirmwareStatus::Downloading);
                }
            }
            Stage::Downloading => {
                let progress = self
                    .download_hook
                    .as_mut()
                    .map(|hook| hook(&self.location))
                    .unwrap_or(DownloadProgress::Failed);
                match progress {
                    DownloadProgress::InProgress => {}
                    DownloadProgress::Done => {
                        self.stage = Stage::WaitingForIdle;
                        self.report(sv, FirmwareStatus::Downloaded);
                    }
                    DownloadProgress::Failed => {
                        self.retries_left -= 1;
                        self.report(sv, FirmwareStatus::DownloadFailed);
                        if self.retries_left > 0 {
                            self.retry_at_ms = Some(
                                sv.time.uptime_ms() + self.retry_interval_s as u64 * 1000,
                            );
                            self.stage = Stage::WaitingForRetrieveDate;
                        } else {
                            warn!("firmware download failed, giving up");
                            self.stage = Stage::Idle;
                        }
                    }
                }
            }
            Stage::WaitingForIdle => {
                if all_idle {
                    if self.install_hook.is_none() {
                        // Download-only integration: the host flashes and
                        // reboots on its own.
                        self.stage = Stage::Idle;
                        return;
                    }
                    self.stage = Stage::Installing;
                    self.report(sv, FirmwareStatus::Installing);
                }
            }
            Stage::Installing => {
                let progress = self
                    .install_hook
                    .as_mut()
                    .map(|hook| hook(&self.location))
                    .unwrap_or(InstallProgress::Failed);
                match progress {
                    InstallProgress::InProgress => {}
                    InstallProgress::Done => {
                        info!("firmware installed");
                        self.stage = Stage::Idle;
                        self.report(sv, FirmwareStatus::Installed);
                    }
                    InstallProgress::Failed => {
                        warn!("firmware installation failed");
                        self.stage = Stage::Idle;
                        self.report(sv, FirmwareStatus::InstallationFailed);
                    }
                }
            }
        }
    }
}

impl Default for FirmwareService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::{declare_standard_keys, ConfigRegistry};
    use crate::domain::authorization::AuthorizationService;
    use crate::domain::reservation::ReservationService;
    use crate::domain::transaction_store::TransactionStore;
    use crate::operations::operation::{Operation, Outbox};
    use crate::storage::MemoryFilesystem;
    use crate::support::clock::{SimClock, TimeService};

    struct Rig {
        config: ConfigRegistry,
        time: TimeService,
        tx_store: TransactionStore,
        reservations: ReservationService,
        auth: AuthorizationService,
        outbox: Outbox,
        tx_notify: Option<crate::domain::TxNotificationCallback>,
        clock: Rc<SimClock>,
    }

    impl Rig {
        fn new() -> Self {
            let mut config = ConfigRegistry::new(None);
            declare_standard_keys(&mut config, 1);
            let clock = Rc::new(SimClock::new(
                Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            ));
            Self {
                config,
                time: TimeService::new(Box::new(clock.clone())),
                tx_store: TransactionStore::open(Arc::new(MemoryFilesystem::new()), 1, 4),
                reservations: ReservationService::new(None, 1),
                auth: AuthorizationService::new(None, 16),
                outbox: Outbox::default(),
                tx_notify: None,
                clock,
            }
        }

        fn tick(&mut self, service: &mut FirmwareService, all_idle: bool) {
            let mut sv = Services {
                config: &mut self.config,
                time: &mut self.time,
                tx_store: &mut self.tx_store,
                reservations: &mut self.reservations,
                auth: &mut self.auth,
                outbox: &mut self.outbox,
                tx_notify: &mut self.tx_notify,
                boot_nr: 1,
                online: true,
                boot_accepted: true,
            };
            service.tick(&mut sv, all_idle);
        }

        fn reports(&mut self) -> Vec<FirmwareStatus> {
            self.outbox
                .drain()
                .into_iter()
                .filter_map(|r| match r.operation {
                    Operation::FirmwareStatusNotification { status } => Some(status),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn download_failure_retries_then_gives_up() {
        let mut rig = Rig::new();
        let mut service = FirmwareService::new();
        service.set_download_hook(Box::new(|_| DownloadProgress::Failed));
        service.schedule("ftp://cs/fw.bin".into(), None, Some(2), Some(5));

        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::Downloading]);

        // First failure arms the retry timer.
        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::DownloadFailed]);
        rig.tick(&mut service, true);
        assert!(rig.reports().is_empty());

        // Past the retry interval: one more attempt, then it gives up.
        rig.clock.advance_ms(6_000);
        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::Downloading]);
        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::DownloadFailed]);
        assert_eq!(service.current_status(), FirmwareStatus::Idle);
        rig.tick(&mut service, true);
        assert!(rig.reports().is_empty());
    }

    #[test]
    fn installation_waits_for_every_connector_to_go_idle() {
        let mut rig = Rig::new();
        let mut service = FirmwareService::new();
        service.set_download_hook(Box::new(|_| DownloadProgress::Done));
        let install_polls = Rc::new(Cell::new(0u32));
        {
            let install_polls = install_polls.clone();
            service.set_install_hook(Box::new(move |_| {
                install_polls.set(install_polls.get() + 1);
                if install_polls.get() < 2 {
                    InstallProgress::InProgress
                } else {
                    InstallProgress::Done
                }
            }));
        }
        service.schedule("ftp://cs/fw.bin".into(), None, None, None);

        rig.tick(&mut service, false);
        assert_eq!(rig.reports(), vec![FirmwareStatus::Downloading]);
        rig.tick(&mut service, false);
        assert_eq!(rig.reports(), vec![FirmwareStatus::Downloaded]);
        assert!(service.installation_in_progress());

        // A session is still open somewhere: the installer must not run.
        rig.tick(&mut service, false);
        assert!(rig.reports().is_empty());
        assert_eq!(install_polls.get(), 0);

        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::Installing]);
        rig.tick(&mut service, true);
        assert_eq!(install_polls.get(), 1);
        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::Installed]);
        assert!(!service.installation_in_progress());
    }

    #[test]
    fn retrieve_date_defers_the_download() {
        let mut rig = Rig::new();
        let mut service = FirmwareService::new();
        service.set_download_hook(Box::new(|_| DownloadProgress::Done));
        let retrieve_at = Utc.with_ymd_and_hms(2023, 5, 1, 13, 0, 0).unwrap();
        service.schedule("ftp://cs/fw.bin".into(), Some(retrieve_at), None, None);

        rig.tick(&mut service, true);
        assert!(rig.reports().is_empty());

        rig.clock.advance_ms(3_600_000);
        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::Downloading]);
    }

    #[test]
    fn failed_installation_is_reported() {
        let mut rig = Rig::new();
        let mut service = FirmwareService::new();
        service.set_download_hook(Box::new(|_| DownloadProgress::Done));
        service.set_install_hook(Box::new(|_| InstallProgress::Failed));
        service.schedule("ftp://cs/fw.bin".into(), None, None, None);

        rig.tick(&mut service, true); // Downloading
        rig.tick(&mut service, true); // Downloaded
        rig.tick(&mut service, true); // Installing
        rig.reports();
        rig.tick(&mut service, true);
        assert_eq!(rig.reports(), vec![FirmwareStatus::InstallationFailed]);
        assert_eq!(service.current_status(), FirmwareStatus::Idle);
    }
}
