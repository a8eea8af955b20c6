mod booking;
mod bulk;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod resolver;
mod store;

pub use booking::SweepReport;
pub use bulk::{
    BulkAvailability, BulkOperation, DateOutcome, DateResult, RejectReason, VehicleBulkResult,
};
pub use error::EngineError;
pub use lifecycle::{Transition, allowed_transitions, validate_transition};
pub use resolver::{
    PriceBreakdown, effective_base_price, price_breakdown, resolve_day, resolve_price,
    resolve_span, resolve_status, weekend_price,
};
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::Policy;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::payment::PaymentProcessor;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Every append already queued when the first one arrives shares its fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so a half-written batch never leaks
    // into the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// Booking lifecycle and calendar engine. Owns the row store, the WAL
/// writer and the payment collaborator.
pub struct Engine {
    store: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    payments: Arc<dyn PaymentProcessor>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    /// Serializes vehicle registration and settings writes against each
    /// other and against compaction. Always taken before any vehicle lock.
    catalog_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        payments: Arc<dyn PaymentProcessor>,
        policy: Policy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            notify,
            payments,
            clock: Arc::new(SystemClock),
            policy,
            catalog_lock: Mutex::new(()),
        };

        // Sole owner of every lock during replay, so try_write never fails.
        for event in &events {
            match event {
                Event::SettingsUpserted { settings } => engine.store.put_settings(settings.clone()),
                Event::VehicleUpserted { vehicle } if engine.store.get_vehicle(&vehicle.id).is_none() => {
                    engine.store.create_vehicle(vehicle.clone());
                }
                other => {
                    if let Some(vehicle_id) = other.vehicle_id()
                        && let Some(shared) = engine.store.get_vehicle(&vehicle_id)
                        && let Ok(mut guard) = shared.try_write()
                    {
                        engine.store.apply_event(&mut guard, other);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::VEHICLES_ACTIVE)
            .set(engine.store.vehicle_count() as f64);
        tracing::info!(
            "replayed {} WAL events, {} vehicles",
            events.len(),
            engine.store.vehicle_count()
        );
        Ok(engine)
    }

    /// Replace the wall clock, e.g. with a `ManualClock` in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Today's UTC calendar date.
    pub fn today(&self) -> chrono::NaiveDate {
        date_of_ms(self.now_ms())
    }

    pub fn vehicle_count(&self) -> usize {
        self.store.vehicle_count()
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.store.get_vehicle(id)
    }

    pub(super) fn vehicle_or_not_found(&self, id: Ulid) -> Result<SharedVehicleState, EngineError> {
        self.store.get_vehicle(&id).ok_or(EngineError::NotFound(id))
    }

    /// Booking id → owning vehicle's shared state.
    pub(super) fn vehicle_for_booking(&self, booking_id: Ulid) -> Result<SharedVehicleState, EngineError> {
        let vehicle_id = self
            .store
            .get_vehicle_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        self.vehicle_or_not_found(vehicle_id)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply to the locked vehicle, then notify subscribers.
    /// Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(vs, event);
        self.notify.send(vs.vehicle.id, event);
        Ok(())
    }

    /// Persist a settings row. Caller holds `catalog_lock`.
    pub(super) async fn persist_settings(&self, settings: CalendarSettings) -> Result<(), EngineError> {
        self.wal_append(&Event::SettingsUpserted {
            settings: settings.clone(),
        })
        .await?;
        self.store.put_settings(settings);
        Ok(())
    }

    /// Rewrite the WAL with one record per live row. Vehicle and catalog
    /// locks are held until the swap so no write lands between snapshot
    /// and rename.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let mut guards = Vec::new();
        for shared in self.store.vehicle_states() {
            guards.push(shared.read_owned().await);
        }

        let mut events = Vec::new();
        for vs in &guards {
            events.push(Event::VehicleUpserted {
                vehicle: vs.vehicle.clone(),
            });
            if !vs.days.is_empty() {
                events.push(Event::DaysWritten {
                    vehicle_id: vs.vehicle.id,
                    days: vs.days.values().cloned().collect(),
                });
            }
            for booking in &vs.bookings {
                events.push(Event::BookingRecorded {
                    booking: booking.clone(),
                });
            }
        }
        for settings in self.store.all_settings() {
            events.push(Event::SettingsUpserted { settings });
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
