use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedVehicleState;

/// Row store for vehicles, their day rows and bookings, plus owner settings.
/// Each vehicle's rows sit behind one async lock; that lock is the unit of
/// atomicity for every write touching `(vehicle_id, date)`.
pub struct InMemoryStore {
    vehicles: DashMap<Ulid, SharedVehicleState>,
    settings: DashMap<Ulid, CalendarSettings>,
    /// Reverse lookup: booking id → vehicle id
    booking_to_vehicle: DashMap<Ulid, Ulid>,
    renter_bookings: DashMap<Ulid, Vec<Ulid>>,
    owner_vehicles: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            vehicles: DashMap::new(),
            settings: DashMap::new(),
            booking_to_vehicle: DashMap::new(),
            renter_bookings: DashMap::new(),
            owner_vehicles: DashMap::new(),
        }
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    /// Register a new vehicle row. Returns the existing state if already present.
    pub fn create_vehicle(&self, vehicle: Vehicle) -> SharedVehicleState {
        let id = vehicle.id;
        let owner = vehicle.owner_id;
        let entry = self
            .vehicles
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(VehicleState::new(vehicle))))
            .value()
            .clone();
        let mut owned = self.owner_vehicles.entry(owner).or_default();
        if !owned.contains(&id) {
            owned.push(id);
        }
        entry
    }

    pub fn vehicle_states(&self) -> Vec<SharedVehicleState> {
        self.vehicles.iter().map(|e| e.value().clone()).collect()
    }

    pub fn owner_vehicle_ids(&self, owner_id: &Ulid) -> Vec<Ulid> {
        self.owner_vehicles
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Settings ─────────────────────────────────────────────

    pub fn get_settings(&self, owner_id: &Ulid) -> Option<CalendarSettings> {
        self.settings.get(owner_id).map(|e| e.value().clone())
    }

    pub fn put_settings(&self, settings: CalendarSettings) {
        self.settings.insert(settings.owner_id, settings);
    }

    pub fn all_settings(&self) -> Vec<CalendarSettings> {
        self.settings.iter().map(|e| e.value().clone()).collect()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn get_vehicle_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_vehicle.get(booking_id).map(|e| *e.value())
    }

    pub fn renter_booking_ids(&self, renter_id: &Ulid) -> Vec<Ulid> {
        self.renter_bookings
            .get(renter_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn index_booking(&self, booking: &Booking) {
        if self
            .booking_to_vehicle
            .insert(booking.id, booking.vehicle_id)
            .is_none()
        {
            self.renter_bookings
                .entry(booking.renter_id)
                .or_default()
                .push(booking.id);
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply a vehicle-scoped event. The caller holds the vehicle's write lock.
    pub fn apply_event(&self, vs: &mut VehicleState, event: &Event) {
        match event {
            Event::VehicleUpserted { vehicle } => {
                if vs.vehicle.owner_id != vehicle.owner_id {
                    if let Some(mut owned) = self.owner_vehicles.get_mut(&vs.vehicle.owner_id) {
                        owned.retain(|v| *v != vehicle.id);
                    }
                    let mut owned = self.owner_vehicles.entry(vehicle.owner_id).or_default();
                    if !owned.contains(&vehicle.id) {
                        owned.push(vehicle.id);
                    }
                }
                vs.vehicle = vehicle.clone();
            }
            Event::DaysWritten { days, .. } => {
                for row in days {
                    vs.days.insert(row.date, row.clone());
                }
            }
            Event::BookingRecorded { booking } => {
                sync_claims(vs, booking);
                self.index_booking(booking);
                vs.upsert_booking(booking.clone());
            }
            // Settings live outside vehicle state
            Event::SettingsUpserted { settings } => self.put_settings(settings.clone()),
        }
    }
}

/// Bring the day rows in line with a booking's status: live requests hold
/// `pending`, confirmed and completed stays hold `booked`, terminal
/// cancellations release the days (price overrides are kept).
fn sync_claims(vs: &mut VehicleState, booking: &Booking) {
    let held = match booking.status {
        BookingStatus::Pending | BookingStatus::AwaitingApproval => Some(DayStatus::Pending),
        BookingStatus::Confirmed | BookingStatus::Completed => Some(DayStatus::Booked),
        BookingStatus::Rejected | BookingStatus::Cancelled => None,
    };
    let vehicle_id = vs.vehicle.id;

    match held {
        Some(status) => {
            for date in booking.span().dates() {
                let row = vs
                    .days
                    .entry(date)
                    .or_insert_with(|| DayOverride::new(vehicle_id, date));
                row.status = status;
                row.booking_id = Some(booking.id);
            }
        }
        None => {
            for date in booking.span().dates() {
                if let Some(row) = vs.days.get_mut(&date)
                    && row.booking_id == Some(booking.id)
                {
                    row.status = DayStatus::Available;
                    row.booking_id = None;
                }
            }
        }
    }
}
