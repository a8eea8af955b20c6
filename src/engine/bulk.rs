use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::resolver::resolve_status;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAvailability {
    Available,
    Blocked,
}

impl From<BulkAvailability> for DayStatus {
    fn from(value: BulkAvailability) -> Self {
        match value {
            BulkAvailability::Available => DayStatus::Available,
            BulkAvailability::Blocked => DayStatus::Blocked,
        }
    }
}

/// A host's calendar edit across many dates and vehicles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BulkOperation {
    Availability {
        dates: Vec<NaiveDate>,
        vehicle_ids: Vec<Ulid>,
        status: BulkAvailability,
        /// Also drop any price override on the written days.
        #[serde(default)]
        clear_price: bool,
    },
    Pricing {
        dates: Vec<NaiveDate>,
        vehicle_ids: Vec<Ulid>,
        /// `None` removes the override.
        price: Option<Money>,
        #[serde(default, rename = "isWeekendOverride")]
        weekend_only: bool,
    },
}

impl BulkOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            BulkOperation::Availability { .. } => "availability",
            BulkOperation::Pricing { .. } => "pricing",
        }
    }

    fn targets(&self) -> (&[NaiveDate], &[Ulid]) {
        match self {
            BulkOperation::Availability {
                dates, vehicle_ids, ..
            }
            | BulkOperation::Pricing {
                dates, vehicle_ids, ..
            } => (dates.as_slice(), vehicle_ids.as_slice()),
        }
    }

    /// Check sizes and values; returns the sorted distinct dates and the
    /// distinct vehicle ids in request order.
    pub fn validate(&self) -> Result<(Vec<NaiveDate>, Vec<Ulid>), EngineError> {
        let (dates, vehicle_ids) = self.targets();
        if dates.is_empty() {
            return Err(EngineError::ValidationFailed("no dates given".into()));
        }
        if vehicle_ids.is_empty() {
            return Err(EngineError::ValidationFailed("no vehicles given".into()));
        }
        if dates.len() > MAX_BULK_DATES {
            return Err(EngineError::LimitExceeded("too many dates in bulk operation"));
        }
        if vehicle_ids.len() > MAX_BULK_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles in bulk operation"));
        }
        if let BulkOperation::Pricing {
            price: Some(price), ..
        } = self
        {
            if *price <= 0 {
                return Err(EngineError::ValidationFailed(format!(
                    "price must be positive, got {price}"
                )));
            }
            if *price > MAX_DAILY_PRICE {
                return Err(EngineError::LimitExceeded("price too large"));
            }
        }

        let mut dates = dates.to_vec();
        dates.sort_unstable();
        dates.dedup();
        let mut vehicles: Vec<Ulid> = Vec::with_capacity(vehicle_ids.len());
        for id in vehicle_ids {
            if !vehicles.contains(id) {
                vehicles.push(*id);
            }
        }
        Ok((dates, vehicles))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Held by a confirmed or completed stay.
    Booked,
    /// Held by a request awaiting payment or approval.
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOutcome {
    Applied,
    /// Weekday in a weekend-only pricing operation.
    Skipped,
    Rejected(RejectReason),
}

impl DateOutcome {
    fn label(&self) -> &'static str {
        match self {
            DateOutcome::Applied => "applied",
            DateOutcome::Skipped => "skipped",
            DateOutcome::Rejected(_) => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateResult {
    pub date: NaiveDate,
    pub outcome: DateOutcome,
}

/// Per-vehicle result. `error` is set when nothing could be written for the
/// vehicle at all (unknown, not owned, or the write failed to persist).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleBulkResult {
    pub vehicle_id: Ulid,
    pub dates: Vec<DateResult>,
    pub error: Option<String>,
}

impl VehicleBulkResult {
    fn failed(vehicle_id: Ulid, error: &EngineError) -> Self {
        Self {
            vehicle_id,
            dates: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn applied(&self) -> usize {
        self.dates
            .iter()
            .filter(|r| r.outcome == DateOutcome::Applied)
            .count()
    }

    pub fn outcome(&self, date: NaiveDate) -> Option<DateOutcome> {
        self.dates.iter().find(|r| r.date == date).map(|r| r.outcome)
    }
}

/// Compute the rows one vehicle needs and the outcome for each date.
fn plan_vehicle(
    vs: &VehicleState,
    operation: &BulkOperation,
    dates: &[NaiveDate],
) -> (Vec<DayOverride>, Vec<DateResult>) {
    let mut rows = Vec::new();
    let mut results = Vec::with_capacity(dates.len());
    let vehicle_id = vs.vehicle.id;

    for &date in dates {
        let existing = vs.day(&date);
        let mut row = existing
            .cloned()
            .unwrap_or_else(|| DayOverride::new(vehicle_id, date));

        let outcome = match operation {
            BulkOperation::Availability {
                status, clear_price, ..
            } => {
                let query = DateSpan::new(date, date);
                match resolve_status(existing, vs.overlapping(&query)) {
                    DayStatus::Booked => DateOutcome::Rejected(RejectReason::Booked),
                    DayStatus::Pending => DateOutcome::Rejected(RejectReason::Requested),
                    DayStatus::Available | DayStatus::Blocked => {
                        row.status = (*status).into();
                        if *clear_price {
                            row.price_override = None;
                        }
                        DateOutcome::Applied
                    }
                }
            }
            BulkOperation::Pricing {
                price,
                weekend_only,
                ..
            } => {
                if *weekend_only && !is_weekend(date) {
                    DateOutcome::Skipped
                } else {
                    row.price_override = *price;
                    DateOutcome::Applied
                }
            }
        };

        if outcome == DateOutcome::Applied && existing != Some(&row) {
            rows.push(row);
        }
        results.push(DateResult { date, outcome });
    }
    (rows, results)
}

impl Engine {
    /// Apply a host's bulk calendar edit. Each vehicle is written as one
    /// unit under its lock; dates are decided independently and a refused
    /// date never fails the rest of the batch.
    pub async fn apply_bulk(
        &self,
        host_id: Ulid,
        operation: BulkOperation,
    ) -> Result<Vec<VehicleBulkResult>, EngineError> {
        let (dates, vehicle_ids) = operation.validate()?;
        let kind = operation.kind();
        let mut results = Vec::with_capacity(vehicle_ids.len());

        for vehicle_id in vehicle_ids {
            let Some(shared) = self.store.get_vehicle(&vehicle_id) else {
                results.push(VehicleBulkResult::failed(
                    vehicle_id,
                    &EngineError::NotFound(vehicle_id),
                ));
                continue;
            };
            let mut vs = shared.write().await;
            if vs.vehicle.owner_id != host_id {
                results.push(VehicleBulkResult::failed(
                    vehicle_id,
                    &EngineError::Unauthorized(vehicle_id),
                ));
                continue;
            }

            let (rows, dates_out) = plan_vehicle(&vs, &operation, &dates);
            if !rows.is_empty() {
                let event = Event::DaysWritten {
                    vehicle_id,
                    days: rows,
                };
                if let Err(e) = self.persist_and_apply(&mut vs, &event).await {
                    warn!("bulk {kind} on vehicle {vehicle_id} failed: {e}");
                    results.push(VehicleBulkResult::failed(vehicle_id, &e));
                    continue;
                }
            }

            for r in &dates_out {
                metrics::counter!(
                    observability::BULK_DATES_TOTAL,
                    "kind" => kind,
                    "outcome" => r.outcome.label()
                )
                .increment(1);
            }
            let result = VehicleBulkResult {
                vehicle_id,
                dates: dates_out,
                error: None,
            };
            debug!(
                "bulk {kind} on vehicle {vehicle_id}: {}/{} dates applied",
                result.applied(),
                result.dates.len()
            );
            results.push(result);
        }
        Ok(results)
    }
}
