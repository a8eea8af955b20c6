use std::collections::BTreeMap;

use chrono::NaiveDate;
use futures::future::try_join_all;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_range};
use super::resolver::{resolve_day, resolve_span};
use super::{Engine, EngineError};

impl Engine {
    /// Effective status and price of one vehicle-day.
    pub async fn resolve(&self, vehicle_id: Ulid, date: NaiveDate) -> Result<DayState, EngineError> {
        let shared = self.vehicle_or_not_found(vehicle_id)?;
        let vs = shared.read().await;
        let settings = self.store.get_settings(&vs.vehicle.owner_id);
        Ok(resolve_day(
            &vs,
            settings.as_ref(),
            date,
            self.policy.default_daily_price,
        ))
    }

    /// Availability and pricing for every day of `month`, keyed by ISO date.
    pub async fn resolve_month(
        &self,
        vehicle_ids: &[Ulid],
        month: Month,
    ) -> Result<MonthCalendar, EngineError> {
        if vehicle_ids.len() > MAX_MONTH_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles in month query"));
        }
        let span = month
            .span()
            .ok_or_else(|| EngineError::ValidationFailed(format!("invalid month {month}")))?;

        let months = try_join_all(
            vehicle_ids
                .iter()
                .map(|&vehicle_id| self.resolve_vehicle_month(vehicle_id, span)),
        )
        .await?;
        Ok(MonthCalendar {
            month,
            vehicles: vehicle_ids.iter().copied().zip(months).collect::<BTreeMap<_, _>>(),
        })
    }

    async fn resolve_vehicle_month(
        &self,
        vehicle_id: Ulid,
        span: DateSpan,
    ) -> Result<VehicleMonth, EngineError> {
        let shared = self.vehicle_or_not_found(vehicle_id)?;
        let vs = shared.read().await;
        let settings = self.store.get_settings(&vs.vehicle.owner_id);

        let mut out = VehicleMonth::default();
        for (date, state) in
            resolve_span(&vs, settings.as_ref(), span, self.policy.default_daily_price)
        {
            let key = date.format("%Y-%m-%d").to_string();
            out.availability.insert(key.clone(), state.status);
            out.pricing.insert(key, state.price);
        }
        Ok(out)
    }

    /// True when every date in `[start, end]` resolves to available,
    /// ignoring anything held by `exclude`.
    pub async fn check_range(
        &self,
        vehicle_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_range(start, end)?;
        let shared = self.vehicle_or_not_found(vehicle_id)?;
        let vs = shared.read().await;
        match check_no_conflict(&vs, span, exclude) {
            Ok(()) => Ok(true),
            Err(EngineError::Conflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let shared = self.vehicle_for_booking(booking_id)?;
        let vs = shared.read().await;
        vs.booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Requests waiting on this host, soonest deadline first.
    pub async fn get_pending_bookings(&self, host_id: Ulid) -> Vec<Booking> {
        let mut pending = Vec::new();
        for vehicle_id in self.store.owner_vehicle_ids(&host_id) {
            let Some(shared) = self.store.get_vehicle(&vehicle_id) else {
                continue;
            };
            let vs = shared.read().await;
            pending.extend(
                vs.bookings
                    .iter()
                    .filter(|b| b.status == BookingStatus::AwaitingApproval)
                    .cloned(),
            );
        }
        pending.sort_by_key(|b| (b.approval_deadline, b.id));
        pending
    }

    /// Every booking the renter has made, newest first.
    pub async fn get_user_bookings(&self, renter_id: Ulid) -> Vec<Booking> {
        let mut bookings = Vec::new();
        for booking_id in self.store.renter_booking_ids(&renter_id) {
            if let Ok(booking) = self.get_booking(booking_id).await {
                bookings.push(booking);
            }
        }
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        bookings
    }

    /// Listings owned by `owner_id`.
    pub async fn list_vehicles(&self, owner_id: Ulid) -> Vec<Vehicle> {
        let mut vehicles = Vec::new();
        for vehicle_id in self.store.owner_vehicle_ids(&owner_id) {
            if let Some(shared) = self.store.get_vehicle(&vehicle_id) {
                vehicles.push(shared.read().await.vehicle.clone());
            }
        }
        vehicles
    }
}
