use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::resolver::resolve_status;
use super::EngineError;

pub(crate) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, EngineError> {
    if start > end {
        return Err(EngineError::ValidationFailed(format!(
            "start date {start} is after end date {end}"
        )));
    }
    let span = DateSpan::new(start, end);
    if span.days() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking range too long"));
    }
    Ok(span)
}

/// Resolver status for `date`, ignoring anything held by `exclude`.
fn status_excluding(state: &VehicleState, date: NaiveDate, exclude: Option<Ulid>) -> DayStatus {
    let day = state
        .day(&date)
        .filter(|row| exclude.is_none() || row.booking_id != exclude);
    let query = DateSpan::new(date, date);
    let covering = state
        .overlapping(&query)
        .filter(|b| Some(b.id) != exclude);
    resolve_status(day, covering)
}

/// Every date in `span` must resolve to `available`. Pending days count as
/// taken so a second request cannot jump the queue.
pub(crate) fn check_no_conflict(
    state: &VehicleState,
    span: DateSpan,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for date in span.dates() {
        if status_excluding(state, date, exclude) != DayStatus::Available {
            return Err(EngineError::Conflict {
                vehicle_id: state.vehicle.id,
                date,
            });
        }
    }
    Ok(())
}
