use chrono::Timelike;
use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn validate_vehicle(vehicle: &Vehicle) -> Result<(), EngineError> {
    if let Some(ref n) = vehicle.name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("vehicle name too long"));
    }
    if vehicle.base_price_per_day < 0 {
        return Err(EngineError::ValidationFailed(format!(
            "base price cannot be negative, got {}",
            vehicle.base_price_per_day
        )));
    }
    if vehicle.base_price_per_day > MAX_DAILY_PRICE {
        return Err(EngineError::LimitExceeded("base price too large"));
    }
    Ok(())
}

fn validate_settings(settings: &CalendarSettings) -> Result<(), EngineError> {
    if let Some(price) = settings.base_price_per_day {
        if price <= 0 {
            return Err(EngineError::ValidationFailed(format!(
                "base price must be positive, got {price}"
            )));
        }
        if price > MAX_DAILY_PRICE {
            return Err(EngineError::LimitExceeded("base price too large"));
        }
    }
    if let Some(adj) = &settings.weekend_price_adjustment {
        let (low, high) = match adj.kind {
            AdjustmentKind::Percentage => (
                Decimal::from(-100),
                Decimal::from(MAX_ADJUSTMENT_PERCENT),
            ),
            AdjustmentKind::Fixed => (
                Decimal::from(-MAX_DAILY_PRICE),
                Decimal::from(MAX_DAILY_PRICE),
            ),
        };
        if adj.value <= low || adj.value > high {
            return Err(EngineError::ValidationFailed(format!(
                "weekend adjustment {} out of range",
                adj.value
            )));
        }
    }
    if settings.minimum_booking_duration == 0 {
        return Err(EngineError::ValidationFailed(
            "minimum booking duration must be at least one day".into(),
        ));
    }
    if settings.minimum_booking_duration > MAX_MINIMUM_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("minimum booking duration too long"));
    }
    if settings.booking_advance_notice > MAX_ADVANCE_NOTICE_HOURS {
        return Err(EngineError::LimitExceeded("advance notice too long"));
    }
    for time in [settings.check_in_time, settings.check_out_time] {
        if time.second() != 0 || time.nanosecond() != 0 {
            return Err(EngineError::ValidationFailed(format!(
                "check-in/out time {time} must be on a whole minute"
            )));
        }
    }
    Ok(())
}

impl Engine {
    /// Register a listing or record an edit to it. Only the current owner
    /// may edit, and ownership cannot move while the vehicle has live
    /// bookings.
    pub async fn upsert_vehicle(&self, actor_id: Ulid, vehicle: Vehicle) -> Result<Vehicle, EngineError> {
        validate_vehicle(&vehicle)?;
        let _catalog = self.catalog_lock.lock().await;
        let event = Event::VehicleUpserted {
            vehicle: vehicle.clone(),
        };

        if let Some(shared) = self.store.get_vehicle(&vehicle.id) {
            let mut guard = shared.write().await;
            if guard.vehicle.owner_id != actor_id {
                return Err(EngineError::Unauthorized(vehicle.id));
            }
            if vehicle.owner_id != guard.vehicle.owner_id
                && let Some(live) = guard.bookings.iter().find(|b| b.status.is_live())
            {
                return Err(EngineError::ValidationFailed(format!(
                    "vehicle {} has live booking {}; ownership cannot change",
                    vehicle.id, live.id
                )));
            }
            self.persist_and_apply(&mut guard, &event).await?;
            return Ok(vehicle);
        }

        if vehicle.owner_id != actor_id {
            return Err(EngineError::Unauthorized(vehicle.id));
        }
        self.wal_append(&event).await?;
        self.store.create_vehicle(vehicle.clone());
        self.notify.send(vehicle.id, &event);
        metrics::gauge!(crate::observability::VEHICLES_ACTIVE)
            .set(self.store.vehicle_count() as f64);
        info!("vehicle {} registered for owner {}", vehicle.id, vehicle.owner_id);
        Ok(vehicle)
    }

    /// The owner's settings, created with defaults on first read.
    pub async fn calendar_settings(&self, owner_id: Ulid) -> Result<CalendarSettings, EngineError> {
        if let Some(settings) = self.store.get_settings(&owner_id) {
            return Ok(settings);
        }
        let _catalog = self.catalog_lock.lock().await;
        // A concurrent first read may have created them while we waited
        if let Some(settings) = self.store.get_settings(&owner_id) {
            return Ok(settings);
        }
        let settings = CalendarSettings::defaults(owner_id);
        self.persist_settings(settings.clone()).await?;
        Ok(settings)
    }

    /// Replace the owner's settings. Last write wins.
    pub async fn update_calendar_settings(
        &self,
        owner_id: Ulid,
        mut settings: CalendarSettings,
    ) -> Result<CalendarSettings, EngineError> {
        settings.owner_id = owner_id;
        validate_settings(&settings)?;
        let _catalog = self.catalog_lock.lock().await;
        self.persist_settings(settings.clone()).await?;
        info!("calendar settings updated for owner {owner_id}");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use std::str::FromStr;

    fn settings() -> CalendarSettings {
        CalendarSettings::defaults(Ulid::new())
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_settings(&settings()).is_ok());
    }

    #[test]
    fn percentage_bounds() {
        let mut s = settings();
        s.weekend_price_adjustment = Some(WeekendAdjustment {
            kind: AdjustmentKind::Percentage,
            value: Decimal::from(-100),
        });
        assert!(validate_settings(&s).is_err());
        s.weekend_price_adjustment = Some(WeekendAdjustment {
            kind: AdjustmentKind::Percentage,
            value: Decimal::from_str("-12.5").unwrap(),
        });
        assert!(validate_settings(&s).is_ok());
    }

    #[test]
    fn zero_base_price_rejected() {
        let mut s = settings();
        s.base_price_per_day = Some(0);
        assert!(matches!(validate_settings(&s), Err(EngineError::ValidationFailed(_))));
    }

    #[test]
    fn minimum_duration_bounds() {
        let mut s = settings();
        s.minimum_booking_duration = 0;
        assert!(validate_settings(&s).is_err());
        s.minimum_booking_duration = MAX_MINIMUM_BOOKING_DAYS + 1;
        assert!(matches!(validate_settings(&s), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn check_in_on_whole_minutes() {
        let mut s = settings();
        s.check_in_time = NaiveTime::from_hms_opt(15, 30, 10).unwrap();
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn vehicle_price_checks() {
        let mut v = Vehicle {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: Some("Golf".into()),
            base_price_per_day: 0,
            requires_approval: false,
        };
        assert!(validate_vehicle(&v).is_ok());
        v.base_price_per_day = -1;
        assert!(validate_vehicle(&v).is_err());
        v.base_price_per_day = MAX_DAILY_PRICE + 1;
        assert!(matches!(validate_vehicle(&v), Err(EngineError::LimitExceeded(_))));
    }
}
