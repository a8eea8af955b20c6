use std::future::Future;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::payment::{IntentStatus, PaymentError, PaymentIntent, PaymentVerb};

use super::conflict::{check_no_conflict, validate_range};
use super::lifecycle::{Transition, row_is_consistent, validate_transition};
use super::resolver::{price_breakdown, resolve_span};
use super::{Engine, EngineError};

/// Outcome of one watcher pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub transitioned: Vec<Ulid>,
    /// Candidates another writer moved on before the write lock was taken.
    pub skipped: usize,
    pub failed: usize,
}

/// Run one processor call, recording its latency and outcome.
async fn timed<T>(
    verb: PaymentVerb,
    call: impl Future<Output = Result<T, PaymentError>>,
) -> Result<T, PaymentError> {
    let start = Instant::now();
    let result = call.await;
    metrics::histogram!(observability::PAYMENT_CALL_DURATION_SECONDS, "verb" => verb.label())
        .record(start.elapsed().as_secs_f64());
    let outcome = match &result {
        Ok(_) => "ok",
        Err(PaymentError::Declined(_)) => "declined",
        Err(_) => "error",
    };
    metrics::counter!(observability::PAYMENT_CALLS_TOTAL, "verb" => verb.label(), "outcome" => outcome)
        .increment(1);
    result
}

fn validate_profile(profile: &RenterProfile) -> Result<(), EngineError> {
    if profile.name.trim().is_empty() {
        return Err(EngineError::ValidationFailed("renter name is required".into()));
    }
    if profile.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("renter name too long"));
    }
    if !profile.email.contains('@') {
        return Err(EngineError::ValidationFailed(format!(
            "invalid renter email {:?}",
            profile.email
        )));
    }
    if profile.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("renter email too long"));
    }
    if let Some(phone) = &profile.phone
        && phone.len() > MAX_PHONE_LEN
    {
        return Err(EngineError::LimitExceeded("renter phone too long"));
    }
    Ok(())
}

/// Owner rules on the requested stay, checked against the booking time `now`.
fn validate_stay(settings: &CalendarSettings, span: DateSpan, now: Ms) -> Result<(), EngineError> {
    if span.start < date_of_ms(now) {
        return Err(EngineError::ValidationFailed(format!(
            "start date {} is in the past",
            span.start
        )));
    }
    if span.days() < settings.minimum_booking_duration {
        return Err(EngineError::ValidationFailed(format!(
            "minimum stay is {} days, requested {}",
            settings.minimum_booking_duration,
            span.days()
        )));
    }
    let notice = settings.booking_advance_notice as Ms * HOUR_MS;
    if notice > 0 && date_start_ms(span.start) < now + notice {
        return Err(EngineError::ValidationFailed(format!(
            "bookings need {} hours notice",
            settings.booking_advance_notice
        )));
    }
    Ok(())
}

fn same_request(booking: &Booking, request: &CreateBookingRequest) -> bool {
    booking.renter_id == request.renter_id
        && booking.start_date == request.start_date
        && booking.end_date == request.end_date
}

/// Authorization key for a request. Derived from what is being booked, the
/// quoted total and the vehicle's attempt generation at snapshot time: a
/// retry against the same calendar reuses the intent, while a price change,
/// a new booking or an abandoned attempt moves the key on.
pub(super) fn idempotency_key(request: &CreateBookingRequest, total: Money, generation: u64) -> String {
    format!(
        "{}:{}:{}:{}:{total}:{generation}",
        request.renter_id, request.vehicle_id, request.start_date, request.end_date
    )
}

/// Bookings recorded plus attempts abandoned after authorizing. Grows on
/// every outcome that could leave a spent intent behind a key.
fn attempt_generation(vs: &VehicleState) -> u64 {
    vs.bookings.len() as u64 + vs.abandoned_attempts
}

/// A hold the new booking can stand on.
fn usable_hold(intent: &PaymentIntent, amount: Money) -> bool {
    intent.status == IntentStatus::RequiresCapture && intent.amount == amount
}

impl Engine {
    /// Price a stay without side effects.
    pub async fn quote(
        &self,
        vehicle_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Quote, EngineError> {
        let span = validate_range(start, end)?;
        let shared = self.vehicle_or_not_found(vehicle_id)?;
        let vs = shared.read().await;
        Ok(self.quote_locked(&vs, span))
    }

    fn quote_locked(&self, vs: &VehicleState, span: DateSpan) -> Quote {
        let settings = self.store.get_settings(&vs.vehicle.owner_id);
        let day_prices: Vec<(NaiveDate, Money)> =
            resolve_span(vs, settings.as_ref(), span, self.policy.default_daily_price)
                .into_iter()
                .map(|(date, state)| (date, state.price))
                .collect();
        let prices: Vec<Money> = day_prices.iter().map(|(_, p)| *p).collect();
        let breakdown = price_breakdown(&prices, self.policy.service_fee_bps);
        Quote {
            vehicle_id: vs.vehicle.id,
            start_date: span.start,
            end_date: span.end,
            day_prices,
            daily_rate: breakdown.daily_rate,
            subtotal: breakdown.subtotal,
            service_fee: breakdown.service_fee,
            total_amount: breakdown.total_amount,
        }
    }

    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
        profile: RenterProfile,
    ) -> Result<Booking, EngineError> {
        let result = self.try_create_booking(request, profile).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    /// Validate and price under a read lock, authorize with no lock held,
    /// then re-check and record under the write lock. The write-phase check
    /// is what closes the race between overlapping requests: the loser's
    /// authorization is cancelled and it sees `Conflict`.
    async fn try_create_booking(
        &self,
        request: CreateBookingRequest,
        profile: RenterProfile,
    ) -> Result<Booking, EngineError> {
        validate_profile(&profile)?;
        let span = validate_range(request.start_date, request.end_date)?;
        let shared = self.vehicle_or_not_found(request.vehicle_id)?;
        let now = self.now_ms();

        let (quote, generation) = {
            let vs = shared.read().await;
            if vs.vehicle.owner_id == request.renter_id {
                return Err(EngineError::ValidationFailed(
                    "owners cannot book their own vehicle".into(),
                ));
            }
            let settings = self
                .store
                .get_settings(&vs.vehicle.owner_id)
                .unwrap_or_else(|| CalendarSettings::defaults(vs.vehicle.owner_id));
            validate_stay(&settings, span, now)?;
            if let Some(existing) = vs
                .overlapping(&span)
                .find(|b| b.status.is_live() && same_request(b, &request))
            {
                debug!("create_booking retry matched live booking {}", existing.id);
                return Ok(existing.clone());
            }
            check_no_conflict(&vs, span, None)?;
            (self.quote_locked(&vs, span), attempt_generation(&vs))
        };

        let key = idempotency_key(&request, quote.total_amount, generation);
        let mut intent = self.authorize_hold(&request, quote.total_amount, &key).await?;
        if !usable_hold(&intent, quote.total_amount) {
            // The key already names a spent or mismatched intent, e.g. one
            // abandoned before a restart reset the attempt count.
            debug!(
                "intent {} under key {key} is {} for {}, authorizing afresh",
                intent.id,
                intent.status.label(),
                intent.amount
            );
            let fresh = format!("{key}:{}", Ulid::new());
            intent = self.authorize_hold(&request, quote.total_amount, &fresh).await?;
        }
        if !usable_hold(&intent, quote.total_amount) {
            return Err(EngineError::PaymentFailed(format!(
                "authorization {} is {}",
                intent.id,
                intent.status.label()
            )));
        }

        let mut vs = shared.write().await;
        if let Some(existing) = vs
            .bookings
            .iter()
            .find(|b| b.status.is_live() && b.payment_intent_id.as_deref() == Some(intent.id.as_str()))
        {
            return Ok(existing.clone());
        }
        if let Err(e) = check_no_conflict(&vs, span, None) {
            vs.abandoned_attempts += 1;
            drop(vs);
            self.rollback_authorization(&intent.id).await;
            return Err(e);
        }

        let status = if vs.vehicle.requires_approval {
            BookingStatus::AwaitingApproval
        } else {
            BookingStatus::Pending
        };
        let booking = Booking {
            id: Ulid::new(),
            vehicle_id: request.vehicle_id,
            renter_id: request.renter_id,
            start_date: span.start,
            end_date: span.end,
            status,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: Some(intent.id.clone()),
            daily_rate: quote.daily_rate,
            subtotal: quote.subtotal,
            service_fee: quote.service_fee,
            total_amount: quote.total_amount,
            approval_deadline: (status == BookingStatus::AwaitingApproval)
                .then_some(now + self.policy.approval_window_ms),
            renter_name: profile.name,
            renter_email: profile.email,
            renter_phone: profile.phone,
            created_at: now,
            updated_at: now,
        };
        debug_assert!(row_is_consistent(&booking), "inconsistent booking row {booking:?}");

        let event = Event::BookingRecorded {
            booking: booking.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut vs, &event).await {
            vs.abandoned_attempts += 1;
            drop(vs);
            self.rollback_authorization(&intent.id).await;
            return Err(e);
        }
        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => status.label()).increment(1);
        info!(
            "booking {} created on vehicle {} ({} to {}), {status}",
            booking.id, booking.vehicle_id, booking.start_date, booking.end_date
        );
        Ok(booking)
    }

    async fn authorize_hold(
        &self,
        request: &CreateBookingRequest,
        amount: Money,
        key: &str,
    ) -> Result<PaymentIntent, EngineError> {
        timed(
            PaymentVerb::Authorize,
            self.payments.authorize(amount, request.renter_id, key),
        )
        .await
        .map_err(|e| {
            warn!("authorization failed for vehicle {}: {e}", request.vehicle_id);
            EngineError::from(e)
        })
    }

    async fn rollback_authorization(&self, intent_id: &str) {
        match timed(
            PaymentVerb::CancelAuthorization,
            self.payments.cancel_authorization(intent_id),
        )
        .await
        {
            Ok(true) => debug!("rolled back authorization {intent_id}"),
            Ok(false) => warn!("authorization {intent_id} could not be cancelled"),
            Err(e) => warn!("rollback of authorization {intent_id} failed: {e}"),
        }
    }

    /// Instant-booking confirmation: re-read the intent and confirm only if
    /// the hold is in place. Confirming an already confirmed booking is a no-op.
    pub async fn confirm_payment(
        &self,
        booking_id: Ulid,
        renter_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let shared = self.vehicle_for_booking(booking_id)?;
        let mut vs = shared.write().await;
        let booking = vs
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.renter_id != renter_id {
            return Err(EngineError::Unauthorized(booking_id));
        }
        if booking.status == BookingStatus::Confirmed {
            return Ok(booking);
        }
        validate_transition(booking.status, Transition::ConfirmPayment)?;
        let intent_id = booking
            .payment_intent_id
            .clone()
            .ok_or_else(|| EngineError::PaymentFailed("booking has no payment intent".into()))?;

        let intent_status = timed(PaymentVerb::GetStatus, self.payments.get_status(&intent_id)).await?;
        let payment_status = match intent_status {
            IntentStatus::RequiresCapture => PaymentStatus::Authorized,
            IntentStatus::Succeeded => PaymentStatus::Captured,
            IntentStatus::Canceled | IntentStatus::Refunded | IntentStatus::Failed => {
                let mut next = booking.clone();
                next.status = BookingStatus::Cancelled;
                next.payment_status = PaymentStatus::Failed;
                self.record(&mut vs, &booking, next).await?;
                return Err(EngineError::PaymentFailed(format!(
                    "payment intent {intent_id} is {}",
                    intent_status.label()
                )));
            }
        };

        if let Err(e) = check_no_conflict(&vs, booking.span(), Some(booking.id)) {
            self.release_locked(&mut vs, booking, Transition::Cancel).await?;
            return Err(e);
        }

        let mut next = booking.clone();
        next.status = BookingStatus::Confirmed;
        next.payment_status = payment_status;
        self.record(&mut vs, &booking, next).await
    }

    /// Host decision on a request. Approval stands even if the capture
    /// fails; the row then carries `payment_status=failed`.
    pub async fn host_approval(
        &self,
        booking_id: Ulid,
        host_id: Ulid,
        action: ApprovalAction,
    ) -> Result<Booking, EngineError> {
        let shared = self.vehicle_for_booking(booking_id)?;
        let mut vs = shared.write().await;
        let booking = vs
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if vs.vehicle.owner_id != host_id {
            return Err(EngineError::Unauthorized(booking_id));
        }

        match action {
            ApprovalAction::Approve => {
                let target = validate_transition(booking.status, Transition::Approve)?;
                check_no_conflict(&vs, booking.span(), Some(booking.id))?;
                let mut next = booking.clone();
                next.status = target;
                next.approval_deadline = None;
                next.payment_status = self.capture_payment(&booking).await;
                self.record(&mut vs, &booking, next).await
            }
            ApprovalAction::Reject => self.release_locked(&mut vs, booking, Transition::Reject).await,
        }
    }

    /// Renter or host cancellation. Confirmed stays can only be cancelled
    /// before their start date.
    pub async fn cancel(&self, booking_id: Ulid, actor_id: Ulid) -> Result<Booking, EngineError> {
        let shared = self.vehicle_for_booking(booking_id)?;
        let mut vs = shared.write().await;
        let booking = vs
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if actor_id != booking.renter_id && actor_id != vs.vehicle.owner_id {
            return Err(EngineError::Unauthorized(booking_id));
        }
        validate_transition(booking.status, Transition::Cancel)?;
        if booking.status == BookingStatus::Confirmed && self.today() >= booking.start_date {
            return Err(EngineError::ValidationFailed(format!(
                "stay started on {}; it can no longer be cancelled",
                booking.start_date
            )));
        }
        self.release_locked(&mut vs, booking, Transition::Cancel).await
    }

    /// Close out a confirmed stay whose last day is behind us.
    pub async fn complete(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let shared = self.vehicle_for_booking(booking_id)?;
        let mut vs = shared.write().await;
        let booking = vs
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        validate_transition(booking.status, Transition::Complete)?;
        if booking.end_date >= self.today() {
            return Err(EngineError::ValidationFailed(format!(
                "stay runs until {}",
                booking.end_date
            )));
        }
        self.complete_locked(&mut vs, booking).await
    }

    /// Reject overdue approval requests, exactly as a host rejection would.
    pub async fn sweep(&self, now: Ms) -> SweepReport {
        self.sweep_due(Transition::Expire, "expire_approval", |b| {
            b.status == BookingStatus::AwaitingApproval
                && b.approval_deadline.is_some_and(|deadline| deadline < now)
        })
        .await
    }

    /// Cancel instant-booking requests whose payment was never confirmed.
    pub async fn expire_unpaid(&self, now: Ms) -> SweepReport {
        let timeout = self.policy.payment_timeout_ms;
        self.sweep_due(Transition::Cancel, "expire_unpaid", |b| {
            b.status == BookingStatus::Pending && b.created_at + timeout < now
        })
        .await
    }

    /// Complete confirmed stays that ended before `now`'s date.
    pub async fn complete_elapsed(&self, now: Ms) -> SweepReport {
        let today = date_of_ms(now);
        self.sweep_due(Transition::Complete, "complete", |b| {
            b.status == BookingStatus::Confirmed && b.end_date < today
        })
        .await
    }

    /// Collect candidates under a read lock, then re-test each one under the
    /// write lock before acting. A booking that no longer matches was moved
    /// by a concurrent writer and is skipped.
    ///
    /// The vehicle's write lock is held across the processor calls, as in
    /// `host_approval` and `cancel`, so the payment outcome and the recorded
    /// row change together. A slow processor call therefore blocks `resolve`
    /// and `resolve_month` on that vehicle until it returns.
    async fn sweep_due(
        &self,
        transition: Transition,
        action: &'static str,
        is_due: impl Fn(&Booking) -> bool,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        for shared in self.store.vehicle_states() {
            let due: Vec<Ulid> = {
                let vs = shared.read().await;
                vs.bookings.iter().filter(|b| is_due(b)).map(|b| b.id).collect()
            };
            if due.is_empty() {
                continue;
            }

            let mut vs = shared.write().await;
            for id in due {
                let Some(booking) = vs.booking(&id).filter(|b| is_due(b)).cloned() else {
                    debug!("{action}: booking {id} already moved, skipping");
                    report.skipped += 1;
                    continue;
                };
                let result = match transition {
                    Transition::Complete => self.complete_locked(&mut vs, booking).await,
                    _ => self.release_locked(&mut vs, booking, transition).await,
                };
                match result {
                    Ok(_) => {
                        metrics::counter!(observability::WATCHER_ACTIONS_TOTAL, "action" => action)
                            .increment(1);
                        report.transitioned.push(id);
                    }
                    Err(e) => {
                        warn!("{action}: booking {id} failed: {e}");
                        report.failed += 1;
                    }
                }
            }
        }
        if !report.transitioned.is_empty() {
            info!("{action}: {} bookings moved", report.transitioned.len());
        }
        report
    }

    // ── Locked transition bodies ─────────────────────────────

    /// Reject, expire or cancel: release the payment, drop the deadline,
    /// and let the recorded status free the dates.
    async fn release_locked(
        &self,
        vs: &mut VehicleState,
        booking: Booking,
        transition: Transition,
    ) -> Result<Booking, EngineError> {
        let target = validate_transition(booking.status, transition)?;
        let mut next = booking.clone();
        next.status = target;
        next.approval_deadline = None;
        next.payment_status = self.release_payment(&booking).await;
        self.record(vs, &booking, next).await
    }

    async fn complete_locked(
        &self,
        vs: &mut VehicleState,
        booking: Booking,
    ) -> Result<Booking, EngineError> {
        let target = validate_transition(booking.status, Transition::Complete)?;
        let mut next = booking.clone();
        next.status = target;
        if matches!(
            booking.payment_status,
            PaymentStatus::Authorized | PaymentStatus::Failed
        ) {
            next.payment_status = self.capture_payment(&booking).await;
        }
        self.record(vs, &booking, next).await
    }

    /// Persist the next version of a booking row.
    async fn record(
        &self,
        vs: &mut VehicleState,
        prev: &Booking,
        mut next: Booking,
    ) -> Result<Booking, EngineError> {
        next.updated_at = self.now_ms();
        debug_assert!(row_is_consistent(&next), "inconsistent booking row {next:?}");
        let event = Event::BookingRecorded {
            booking: next.clone(),
        };
        self.persist_and_apply(vs, &event).await?;

        if next.status != prev.status {
            metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => next.status.label())
                .increment(1);
            info!("booking {} {} -> {}", next.id, prev.status, next.status);
        }
        if next.payment_status == PaymentStatus::Failed && prev.payment_status != PaymentStatus::Failed {
            metrics::counter!(observability::PAYMENT_RECONCILIATION_TOTAL, "action" => next.status.label())
                .increment(1);
            warn!(
                "booking {} is {} with payment intent {:?} needing reconciliation",
                next.id, next.status, next.payment_intent_id
            );
        }
        Ok(next)
    }

    // ── Payment orchestration ────────────────────────────────

    /// Capture a held payment. Never fails the caller; a capture that does
    /// not go through is reported as `Failed`.
    async fn capture_payment(&self, booking: &Booking) -> PaymentStatus {
        let Some(intent_id) = booking.payment_intent_id.as_deref() else {
            return booking.payment_status;
        };
        match timed(PaymentVerb::GetStatus, self.payments.get_status(intent_id)).await {
            Ok(IntentStatus::Succeeded) => PaymentStatus::Captured,
            Ok(IntentStatus::RequiresCapture) => {
                match timed(PaymentVerb::Capture, self.payments.capture(intent_id)).await {
                    Ok(true) => PaymentStatus::Captured,
                    Ok(false) => {
                        warn!("capture of {intent_id} refused");
                        PaymentStatus::Failed
                    }
                    Err(e) => {
                        warn!("capture of {intent_id} failed: {e}");
                        PaymentStatus::Failed
                    }
                }
            }
            Ok(other) => {
                warn!("intent {intent_id} is {} and cannot be captured", other.label());
                PaymentStatus::Failed
            }
            Err(e) => {
                warn!("status check for {intent_id} failed: {e}");
                PaymentStatus::Failed
            }
        }
    }

    /// Give the money back: refund a captured payment, otherwise cancel the
    /// hold (falling back to a refund if the processor already captured).
    async fn release_payment(&self, booking: &Booking) -> PaymentStatus {
        let Some(intent_id) = booking.payment_intent_id.as_deref() else {
            return booking.payment_status;
        };
        if booking.payment_status == PaymentStatus::Captured {
            return self.refund_payment(intent_id).await;
        }
        match timed(
            PaymentVerb::CancelAuthorization,
            self.payments.cancel_authorization(intent_id),
        )
        .await
        {
            Ok(true) => PaymentStatus::Refunded,
            Ok(false) => self.refund_payment(intent_id).await,
            Err(e) => {
                warn!("cancel of authorization {intent_id} failed: {e}");
                PaymentStatus::Failed
            }
        }
    }

    async fn refund_payment(&self, intent_id: &str) -> PaymentStatus {
        match timed(PaymentVerb::Refund, self.payments.refund(intent_id)).await {
            Ok(true) => PaymentStatus::Refunded,
            Ok(false) => {
                warn!("refund of {intent_id} refused");
                PaymentStatus::Failed
            }
            Err(e) => {
                warn!("refund of {intent_id} failed: {e}");
                PaymentStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn settings() -> CalendarSettings {
        CalendarSettings::defaults(Ulid::new())
    }

    #[test]
    fn profile_requires_name_and_email() {
        let mut profile = RenterProfile {
            name: "Ana".into(),
            email: "ana@example.com".into(),
            phone: None,
        };
        assert!(validate_profile(&profile).is_ok());
        profile.email = "nope".into();
        assert!(matches!(validate_profile(&profile), Err(EngineError::ValidationFailed(_))));
        profile.email = "ana@example.com".into();
        profile.name = "  ".into();
        assert!(matches!(validate_profile(&profile), Err(EngineError::ValidationFailed(_))));
        profile.name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(validate_profile(&profile), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn stay_in_past_rejected() {
        let now = date_start_ms(d(5)) + 3 * HOUR_MS;
        assert!(validate_stay(&settings(), DateSpan::new(d(4), d(6)), now).is_err());
        assert!(validate_stay(&settings(), DateSpan::new(d(5), d(6)), now).is_ok());
    }

    #[test]
    fn minimum_duration_enforced() {
        let mut s = settings();
        s.minimum_booking_duration = 3;
        let now = date_start_ms(d(1));
        assert!(validate_stay(&s, DateSpan::new(d(10), d(11)), now).is_err());
        assert!(validate_stay(&s, DateSpan::new(d(10), d(12)), now).is_ok());
    }

    #[test]
    fn advance_notice_counts_hours_to_start_midnight() {
        let mut s = settings();
        s.booking_advance_notice = 24;
        s.check_in_time = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        let now = date_start_ms(d(9)) + HOUR_MS;
        // 23 hours until Jan 10 00:00
        assert!(validate_stay(&s, DateSpan::new(d(10), d(11)), now).is_err());
        assert!(validate_stay(&s, DateSpan::new(d(11), d(12)), now).is_ok());
    }

    #[test]
    fn idempotency_key_ignores_wall_clock() {
        let request = CreateBookingRequest {
            vehicle_id: Ulid::new(),
            renter_id: Ulid::new(),
            start_date: d(10),
            end_date: d(12),
        };
        assert_eq!(
            idempotency_key(&request, 28_050, 3),
            idempotency_key(&request, 28_050, 3)
        );
        assert_ne!(
            idempotency_key(&request, 28_050, 3),
            idempotency_key(&request, 28_050, 4)
        );
        assert_ne!(
            idempotency_key(&request, 28_050, 3),
            idempotency_key(&request, 30_800, 3)
        );
        assert!(idempotency_key(&request, 28_050, 0).contains("2025-01-10:2025-01-12"));
    }
}
