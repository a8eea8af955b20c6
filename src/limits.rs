use crate::model::Money;

/// Longest stay a single booking may cover, in days.
pub const MAX_BOOKING_DAYS: u32 = 90;

/// Dates per bulk operation (about one year).
pub const MAX_BULK_DATES: usize = 366;

/// Vehicles per bulk operation.
pub const MAX_BULK_VEHICLES: usize = 100;

/// Vehicles per month calendar query.
pub const MAX_MONTH_VEHICLES: usize = 100;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 32;

/// Upper bound for any per-day price, in minor units.
pub const MAX_DAILY_PRICE: Money = 100_000_000;

/// Weekend percentage adjustments are clamped to this magnitude.
pub const MAX_ADJUSTMENT_PERCENT: i64 = 1_000;

pub const MAX_MINIMUM_BOOKING_DAYS: u32 = 60;
pub const MAX_ADVANCE_NOTICE_HOURS: u32 = 24 * 60;
