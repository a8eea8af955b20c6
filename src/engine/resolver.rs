use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::*;

// ── Availability / Pricing Resolution ────────────────────────────

/// Base daily price for a vehicle. Owner settings win over the listing's own
/// price; when neither is usable the engine default applies.
pub fn effective_base_price(
    vehicle: &Vehicle,
    settings: Option<&CalendarSettings>,
    default_price: Money,
) -> Money {
    settings
        .and_then(|s| s.base_price_per_day)
        .filter(|p| *p > 0)
        .or(Some(vehicle.base_price_per_day).filter(|p| *p > 0))
        .unwrap_or(default_price)
}

/// Round to the nearest minor unit, halves away from zero.
pub fn round_minor(value: Decimal) -> Money {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(Money::MAX)
}

/// Weekend price: `base * (1 + value/100)` for percentages, `base + value`
/// for fixed amounts. Never negative.
pub fn weekend_price(base: Money, adjustment: &WeekendAdjustment) -> Money {
    let base = Decimal::from(base);
    let adjusted = match adjustment.kind {
        AdjustmentKind::Percentage => {
            base * (Decimal::ONE + adjustment.value / Decimal::ONE_HUNDRED)
        }
        AdjustmentKind::Fixed => base + adjustment.value,
    };
    round_minor(adjusted).max(0)
}

/// Status precedence: confirmed booking, then pending/awaiting booking, then
/// the day row (claims and host blocks), then available.
pub fn resolve_status<'a>(
    day: Option<&DayOverride>,
    covering: impl IntoIterator<Item = &'a Booking>,
) -> DayStatus {
    let mut pending = false;
    for booking in covering {
        match booking.status {
            BookingStatus::Confirmed => return DayStatus::Booked,
            BookingStatus::Pending | BookingStatus::AwaitingApproval => pending = true,
            _ => {}
        }
    }
    if pending {
        return DayStatus::Pending;
    }
    match day.map(|d| d.status) {
        Some(DayStatus::Booked) => DayStatus::Booked,
        Some(DayStatus::Pending) => DayStatus::Pending,
        Some(DayStatus::Blocked) => DayStatus::Blocked,
        Some(DayStatus::Available) | None => DayStatus::Available,
    }
}

/// Price precedence: explicit override, then weekend adjustment, then base.
/// Independent of status so hosts see the rate on blocked and booked days.
pub fn resolve_price(
    date: NaiveDate,
    day: Option<&DayOverride>,
    base: Money,
    weekend: Option<&WeekendAdjustment>,
) -> Money {
    if let Some(price) = day.and_then(|d| d.price_override) {
        return price;
    }
    match weekend {
        Some(adj) if is_weekend(date) => weekend_price(base, adj),
        _ => base,
    }
}

/// Resolve one vehicle-day from a consistent snapshot of its rows.
pub fn resolve_day(
    state: &VehicleState,
    settings: Option<&CalendarSettings>,
    date: NaiveDate,
    default_price: Money,
) -> DayState {
    let base = effective_base_price(&state.vehicle, settings, default_price);
    let weekend = settings.and_then(|s| s.weekend_price_adjustment.as_ref());
    let day = state.day(&date);
    let query = DateSpan::new(date, date);
    DayState {
        status: resolve_status(day, state.overlapping(&query)),
        price: resolve_price(date, day, base, weekend),
    }
}

/// Resolve every day of `span`, in order.
pub fn resolve_span(
    state: &VehicleState,
    settings: Option<&CalendarSettings>,
    span: DateSpan,
    default_price: Money,
) -> Vec<(NaiveDate, DayState)> {
    let base = effective_base_price(&state.vehicle, settings, default_price);
    let weekend = settings.and_then(|s| s.weekend_price_adjustment.as_ref());
    let candidates: Vec<&Booking> = state.overlapping(&span).collect();

    span.dates()
        .map(|date| {
            let day = state.day(&date);
            let covering = candidates.iter().copied().filter(|b| b.covers(date));
            let resolved = DayState {
                status: resolve_status(day, covering),
                price: resolve_price(date, day, base, weekend),
            };
            (date, resolved)
        })
        .collect()
}

/// Money fields of a booking, summed from per-day prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub daily_rate: Money,
    pub subtotal: Money,
    pub service_fee: Money,
    pub total_amount: Money,
}

pub fn price_breakdown(day_prices: &[Money], service_fee_bps: u32) -> PriceBreakdown {
    let subtotal: Money = day_prices.iter().sum();
    let days = day_prices.len().max(1) as i64;
    let daily_rate = round_minor(Decimal::from(subtotal) / Decimal::from(days));
    let service_fee =
        round_minor(Decimal::from(subtotal) * Decimal::from(service_fee_bps) / Decimal::from(10_000));
    PriceBreakdown {
        daily_rate,
        subtotal,
        service_fee,
        total_amount: subtotal + service_fee,
    }
}
