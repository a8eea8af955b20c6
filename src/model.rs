use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

/// Single-currency amount in minor units (cents).
pub type Money = i64;

pub const DAY_MS: Ms = 86_400_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Inclusive calendar range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateSpan start must not be after end");
        Self { start, end }
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> u32 {
        (self.end - self.start).num_days() as u32 + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn dates(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Midnight UTC of `date` in unix millis.
pub fn date_start_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// UTC calendar date containing the instant `ms`.
pub fn date_of_ms(ms: Ms) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

// ── Day rows ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Available,
    Blocked,
    /// Withheld by a booking awaiting payment or host approval.
    Pending,
    /// Held by a confirmed (or completed) booking.
    Booked,
}

impl DayStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DayStatus::Available => "available",
            DayStatus::Blocked => "blocked",
            DayStatus::Pending => "pending",
            DayStatus::Booked => "booked",
        }
    }
}

/// Per-vehicle, per-date override row. Unique per `(vehicle_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOverride {
    pub vehicle_id: Ulid,
    pub date: NaiveDate,
    pub status: DayStatus,
    pub price_override: Option<Money>,
    /// Booking holding this day while status is `Pending` or `Booked`.
    pub booking_id: Option<Ulid>,
}

impl DayOverride {
    pub fn new(vehicle_id: Ulid, date: NaiveDate) -> Self {
        Self {
            vehicle_id,
            date,
            status: DayStatus::Available,
            price_override: None,
            booking_id: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.booking_id.is_some()
    }
}

/// Effective state of one vehicle-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayState {
    pub status: DayStatus,
    pub price: Money,
}

// ── Listing rows ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: Option<String>,
    pub base_price_per_day: Money,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekendAdjustment {
    #[serde(rename = "type")]
    pub kind: AdjustmentKind,
    /// Percent for `Percentage`, minor units for `Fixed`.
    pub value: Decimal,
}

/// Per-owner calendar configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSettings {
    pub owner_id: Ulid,
    /// Takes precedence over each vehicle's own base price when set.
    pub base_price_per_day: Option<Money>,
    pub weekend_price_adjustment: Option<WeekendAdjustment>,
    /// Shortest bookable stay, in days.
    pub minimum_booking_duration: u32,
    /// Hours required between booking time and the start date.
    pub booking_advance_notice: u32,
    pub check_in_time: NaiveTime,
    pub check_out_time: NaiveTime,
}

impl CalendarSettings {
    pub fn defaults(owner_id: Ulid) -> Self {
        Self {
            owner_id,
            base_price_per_day: None,
            weekend_price_adjustment: None,
            minimum_booking_duration: 1,
            booking_advance_notice: 0,
            check_in_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
            check_out_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    AwaitingApproval,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }

    /// Holds its dates against other renters.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::AwaitingApproval | BookingStatus::Confirmed
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::AwaitingApproval => "awaiting_approval",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Refunded,
    /// Processor call failed after the lifecycle decision; needs reconciliation.
    Failed,
}

impl PaymentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// Renter identity captured at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenterProfile {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub renter_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub daily_rate: Money,
    pub subtotal: Money,
    pub service_fee: Money,
    pub total_amount: Money,
    pub approval_deadline: Option<Ms>,
    pub renter_name: String,
    pub renter_email: String,
    pub renter_phone: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.start_date, self.end_date)
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.span().contains(date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub vehicle_id: Ulid,
    pub renter_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

// ── Per-vehicle state ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    pub days: BTreeMap<NaiveDate, DayOverride>,
    /// All bookings ever made on this vehicle, sorted by `start_date`.
    pub bookings: Vec<Booking>,
    /// Authorizations taken for requests that never became a booking row.
    /// In memory only; it restarts from zero after replay.
    pub abandoned_attempts: u64,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            days: BTreeMap::new(),
            bookings: Vec::new(),
            abandoned_attempts: 0,
        }
    }

    /// Insert or replace a booking row, maintaining sort order by start date.
    pub fn upsert_booking(&mut self, booking: Booking) {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == booking.id) {
            self.bookings.remove(pos);
        }
        let pos = self
            .bookings
            .partition_point(|b| b.start_date <= booking.start_date);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    /// Bookings (any status) whose range intersects `query`.
    /// Binary search skips bookings starting after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.start_date <= query.end);
        let start = query.start;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end_date >= start)
    }

    pub fn day(&self, date: &NaiveDate) -> Option<&DayOverride> {
        self.days.get(date)
    }
}

// ── Calendar months ──────────────────────────────────────────────

/// A calendar month, parsed from `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        let first = self.first_day()?;
        first
            .checked_add_months(chrono::Months::new(1))?
            .checked_sub_days(Days::new(1))
    }

    pub fn span(&self) -> Option<DateSpan> {
        Some(DateSpan::new(self.first_day()?, self.last_day()?))
    }
}

impl FromStr for Month {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid month {s:?} (expected YYYY-MM)"))?;
        let year: i32 = y.parse().map_err(|_| format!("invalid year in {s:?}"))?;
        let month: u32 = m.parse().map_err(|_| format!("invalid month in {s:?}"))?;
        let parsed = Month { year, month };
        if parsed.first_day().is_none() {
            return Err(format!("month out of range: {s:?}"));
        }
        Ok(parsed)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One event per row mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleUpserted { vehicle: Vehicle },
    SettingsUpserted { settings: CalendarSettings },
    DaysWritten { vehicle_id: Ulid, days: Vec<DayOverride> },
    /// Insert or update of a booking row. Day claims follow from its status.
    BookingRecorded { booking: Booking },
}

impl Event {
    pub fn vehicle_id(&self) -> Option<Ulid> {
        match self {
            Event::VehicleUpserted { vehicle } => Some(vehicle.id),
            Event::DaysWritten { vehicle_id, .. } => Some(*vehicle_id),
            Event::BookingRecorded { booking } => Some(booking.vehicle_id),
            Event::SettingsUpserted { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub vehicle_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub day_prices: Vec<(NaiveDate, Money)>,
    pub daily_rate: Money,
    pub subtotal: Money,
    pub service_fee: Money,
    pub total_amount: Money,
}

/// One vehicle's month, keyed by ISO date string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VehicleMonth {
    pub availability: BTreeMap<String, DayStatus>,
    pub pricing: BTreeMap<String, Money>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCalendar {
    pub month: Month,
    pub vehicles: BTreeMap<Ulid, VehicleMonth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn booking(start: NaiveDate, end: NaiveDate) -> Booking {
        Booking {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            renter_id: Ulid::new(),
            start_date: start,
            end_date: end,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Authorized,
            payment_intent_id: None,
            daily_rate: 0,
            subtotal: 0,
            service_fee: 0,
            total_amount: 0,
            approval_deadline: None,
            renter_name: "r".into(),
            renter_email: "r@example.com".into(),
            renter_phone: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn vehicle_state() -> VehicleState {
        VehicleState::new(Vehicle {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: None,
            base_price_per_day: 8500,
            requires_approval: false,
        })
    }

    #[test]
    fn span_is_inclusive() {
        let s = DateSpan::new(d(2025, 1, 10), d(2025, 1, 12));
        assert_eq!(s.days(), 3);
        assert!(s.contains(d(2025, 1, 10)));
        assert!(s.contains(d(2025, 1, 12)));
        assert!(!s.contains(d(2025, 1, 13)));
        assert_eq!(s.dates().count(), 3);
    }

    #[test]
    fn span_overlap_shares_a_day() {
        let a = DateSpan::new(d(2025, 1, 10), d(2025, 1, 12));
        let b = DateSpan::new(d(2025, 1, 12), d(2025, 1, 14));
        let c = DateSpan::new(d(2025, 1, 13), d(2025, 1, 14));
        assert!(a.overlaps(&b)); // inclusive ends touch
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn single_day_span() {
        let s = DateSpan::new(d(2025, 3, 1), d(2025, 3, 1));
        assert_eq!(s.days(), 1);
        assert_eq!(s.dates().collect::<Vec<_>>(), vec![d(2025, 3, 1)]);
    }

    #[test]
    fn weekend_detection() {
        assert!(is_weekend(d(2025, 1, 11))); // Saturday
        assert!(is_weekend(d(2025, 1, 12))); // Sunday
        assert!(!is_weekend(d(2025, 1, 13))); // Monday
    }

    #[test]
    fn date_ms_round_trip() {
        let day = d(2025, 1, 10);
        let ms = date_start_ms(day);
        assert_eq!(date_of_ms(ms), day);
        assert_eq!(date_of_ms(ms + DAY_MS - 1), day);
        assert_eq!(date_of_ms(ms + DAY_MS), d(2025, 1, 11));
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut vs = vehicle_state();
        vs.upsert_booking(booking(d(2025, 1, 20), d(2025, 1, 21)));
        vs.upsert_booking(booking(d(2025, 1, 1), d(2025, 1, 2)));
        vs.upsert_booking(booking(d(2025, 1, 10), d(2025, 1, 12)));
        let starts: Vec<_> = vs.bookings.iter().map(|b| b.start_date.day()).collect();
        assert_eq!(starts, vec![1, 10, 20]);
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let mut vs = vehicle_state();
        let mut b = booking(d(2025, 1, 10), d(2025, 1, 12));
        vs.upsert_booking(b.clone());
        b.status = BookingStatus::Cancelled;
        vs.upsert_booking(b.clone());
        assert_eq!(vs.bookings.len(), 1);
        assert_eq!(vs.booking(&b.id).unwrap().status, BookingStatus::Cancelled);
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut vs = vehicle_state();
        vs.upsert_booking(booking(d(2025, 1, 1), d(2025, 1, 3)));
        let hit = booking(d(2025, 1, 9), d(2025, 1, 11));
        vs.upsert_booking(hit.clone());
        vs.upsert_booking(booking(d(2025, 2, 1), d(2025, 2, 3)));

        let query = DateSpan::new(d(2025, 1, 10), d(2025, 1, 15));
        let hits: Vec<_> = vs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, hit.id);
    }

    #[test]
    fn overlapping_includes_boundary_days() {
        let mut vs = vehicle_state();
        vs.upsert_booking(booking(d(2025, 1, 5), d(2025, 1, 10)));
        vs.upsert_booking(booking(d(2025, 1, 15), d(2025, 1, 16)));
        let query = DateSpan::new(d(2025, 1, 10), d(2025, 1, 15));
        assert_eq!(vs.overlapping(&query).count(), 2);
    }

    #[test]
    fn month_parse_and_bounds() {
        let m: Month = "2024-02".parse().unwrap();
        assert_eq!(m.first_day(), Some(d(2024, 2, 1)));
        assert_eq!(m.last_day(), Some(d(2024, 2, 29))); // leap year
        assert_eq!(m.to_string(), "2024-02");

        let dec: Month = "2025-12".parse().unwrap();
        assert_eq!(dec.last_day(), Some(d(2025, 12, 31)));

        assert!("2025-13".parse::<Month>().is_err());
        assert!("2025".parse::<Month>().is_err());
        assert!("abcd-01".parse::<Month>().is_err());
    }

    #[test]
    fn status_classification() {
        assert!(BookingStatus::AwaitingApproval.is_live());
        assert!(!BookingStatus::AwaitingApproval.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(!BookingStatus::Completed.is_live());
        assert_eq!(BookingStatus::AwaitingApproval.to_string(), "awaiting_approval");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let owner = Ulid::new();
        let mut settings = CalendarSettings::defaults(owner);
        settings.weekend_price_adjustment = Some(WeekendAdjustment {
            kind: AdjustmentKind::Percentage,
            value: Decimal::new(125, 1),
        });
        let event = Event::SettingsUpserted { settings };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
