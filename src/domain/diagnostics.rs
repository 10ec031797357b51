//! Diagnostics upload orchestration.
//!
//! `GetDiagnostics` asks the host to produce and upload a log archive;
//! this service polls the host hook and reports progress through
//! `DiagnosticsStatusNotification`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::operations::operation::{Operation, Request};

use super::Services;

/// Wire statuses of `DiagnosticsStatusNotification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticsStatus {
    Idle,
    Uploaded,
    UploadFailed,
    Uploading,
}

/// Upload job parameters handed to the host hook.
#[derive(Debug, Clone)]
pub struct DiagnosticsRequest {
    pub location: String,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
}

/// Host-reported progress of the upload, polled every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadProgress {
    InProgress,
    Done,
    Failed,
}

/// Called once to start the upload (returning the produced file name),
/// then polled via the progress callback.
pub struct DiagnosticsHooks {
    pub begin: Box<dyn FnMut(&DiagnosticsRequest) -> Option<String>>,
    pub poll: Box<dyn FnMut() -> UploadProgress>,
}

pub struct DiagnosticsService {
    hooks: Option<DiagnosticsHooks>,
    uploading: bool,
    retries_left: i32,
    retry_interval_s: i32,
    retry_at_ms: Option<u64>,
    pending: Option<DiagnosticsRequest>,
}

impl DiagnosticsService {
    pub fn new() -> Self {
        Self {
            hooks: None,
            uploading: false,
            retries_left: 0,
            retry_interval_s: 0,
            retry_at_ms: None,
            pending: None,
        }
    }

    pub fn set_hooks(&mut self, hooks: DiagnosticsHooks) {
        self.hooks = Some(hooks);
    }

    /// `GetDiagnostics.req`: start the upload, returning the file name for
    /// the conf (`None` when no hook is wired up or nothing to upload).
    pub fn schedule(
        &mut self,
        request: DiagnosticsRequest,
        retries: Option<i32>,
        retry_interval_s: Option<i32>,
    ) -> Option<String> {
        let hooks = self.hooks.as_mut()?;
        let file_name = (hooks.begin)(&request)?;
        info!(location = %request.location, file_name = %file_name, "diagnostics upload started");
        self.uploading = true;
        self.retries_left = retries.unwrap_or(1).max(1);
        self.retry_interval_s = retry_interval_s.unwrap_or(180).max(1);
        self.retry_at_ms = None;
        self.pending = Some(request);
        Some(file_name)
    }

    pub fn current_status(&self) -> DiagnosticsStatus {
        if self.uploading {
            DiagnosticsStatus::Uploading
        } else {
            DiagnosticsStatus::Idle
        }
    }

    fn report(&self, sv: &mut Services, status: DiagnosticsStatus) {
        sv.outbox
            .push(Request::new(Operation::DiagnosticsStatusNotification { status }));
    }

    pub fn tick(&mut self, sv: &mut Services) {
        if !self.uploading {
            return;
        }
        if let Some(at) = self.retry_at_ms {
            if sv.time.uptime_ms() < at {
                return;
            }
            self.retry_at_ms = None;
            let request = self.pending.clone();
            if let (Some(hooks), Some(request)) = (self.hooks.as_mut(), request) {
                if (hooks.begin)(&request).is_none() {
                    self.uploading = false;
                    self.report(sv, DiagnosticsStatus::UploadFailed);
                    return;
                }
            }
        }
        let progress = self
            .hooks
            .as_mut()
            .map(|hooks| (hooks.poll)())
            .unwrap_or(UploadProgress::Failed);
        match progress {
            UploadProgress::InProgress => {}
            UploadProgress::Done => {
                info!("diagnostics uploaded");
                self.uploading = false;
                self.pending = None;
                self.report(sv, DiagnosticsStatus::Uploaded);
            }
            UploadProgress::Failed => {
                self.retries_left -= 1;
                if self.retries_left > 0 {
                    self.retry_at_ms =
                        Some(sv.time.uptime_ms() + self.retry_interval_s as u64 * 1000);
                } else {
                    warn!("diagnostics upload failed, giving up");
                    self.uploading = false;
                    self.pending = None;
                    self.report(sv, DiagnosticsStatus::UploadFailed);
                }
            }
        }
    }
}

impl Default for DiagnosticsService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use chrono::TimeZone;

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

        fn tick(&mut self, service: &mut DiagnosticsService) {
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
            service.tick(&mut sv);
        }

        fn reports(&mut self) -> Vec<DiagnosticsStatus> {
            self.outbox
                .drain()
                .into_iter()
                .filter_map(|r| match r.operation {
                    Operation::DiagnosticsStatusNotification { status } => Some(status),
                    _ => None,
                })
                .collect()
        }
    }

    fn request() -> DiagnosticsRequest {
        DiagnosticsRequest {
            location: "ftp://cs/diag".into(),
            start_time: None,
            stop_time: None,
        }
    }

    fn hooks(
        begins: Rc<Cell<u32>>,
        poll: impl FnMut() -> UploadProgress + 'static,
    ) -> DiagnosticsHooks {
        DiagnosticsHooks {
            begin: Box::new(move |_| {
                begins.set(begins.get() + 1);
                Some("diag-2023-05-01.tar.gz".to_string())
            }),
            poll: Box::new(poll),
        }
    }

    #[test]
    fn schedule_without_hooks_reports_nothing_to_upload() {
        let mut service = DiagnosticsService::new();
        assert_eq!(service.schedule(request(), None, None), None);
        assert_eq!(service.current_status(), DiagnosticsStatus::Idle);
    }

    #[test]
    fn successful_upload_reports_uploaded() {
        let mut rig = Rig::new();
        let mut service = DiagnosticsService::new();
        let begins = Rc::new(Cell::new(0u32));
        service.set_hooks(hooks(begins.clone(), || UploadProgress::Done));

        let file_name = service.schedule(request(), None, None);
        assert_eq!(file_name.as_deref(), Some("diag-2023-05-01.tar.gz"));
        assert_eq!(service.current_status(), DiagnosticsStatus::Uploading);

        rig.tick(&mut service);
        assert_eq!(rig.reports(), vec![DiagnosticsStatus::Uploaded]);
        assert_eq!(service.current_status(), DiagnosticsStatus::Idle);
    }

    #[test]
    fn failed_upload_retries_then_gives_up() {
        let mut rig = Rig::new();
        let mut service = DiagnosticsService::new();
        let begins = Rc::new(Cell::new(0u32));
        service.set_hooks(hooks(begins.clone(), || UploadProgress::Failed));

        assert!(service.schedule(request(), Some(2), Some(5)).is_some());
        assert_eq!(begins.get(), 1);

        // First failure arms the retry timer without a report.
        rig.tick(&mut service);
        assert!(rig.reports().is_empty());
        assert_eq!(service.current_status(), DiagnosticsStatus::Uploading);

        // The timer holds until the interval elapsed.
        rig.tick(&mut service);
        assert!(rig.reports().is_empty());
        assert_eq!(begins.get(), 1);

        // Past the interval: the upload restarts, fails again, gives up.
        rig.clock.advance_ms(6_000);
        rig.tick(&mut service);
        assert_eq!(begins.get(), 2);
        assert_eq!(rig.reports(), vec![DiagnosticsStatus::UploadFailed]);
        assert_eq!(service.current_status(), DiagnosticsStatus::Idle);
        rig.tick(&mut service);
        assert!(rig.reports().is_empty());
    }
}
