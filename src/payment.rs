use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Money;

/// Processor-side state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentStatus {
    /// Funds are held and can be captured or released.
    RequiresCapture,
    Succeeded,
    Canceled,
    Refunded,
    Failed,
}

impl IntentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Refunded => "refunded",
            IntentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: Money,
    pub customer: Ulid,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentVerb {
    Authorize,
    Capture,
    CancelAuthorization,
    Refund,
    GetStatus,
}

impl PaymentVerb {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentVerb::Authorize => "authorize",
            PaymentVerb::Capture => "capture",
            PaymentVerb::CancelAuthorization => "cancel_authorization",
            PaymentVerb::Refund => "refund",
            PaymentVerb::GetStatus => "get_status",
        }
    }
}

#[derive(Debug)]
pub enum PaymentError {
    Declined(String),
    /// Transport or processor outage. Safe to retry with the same idempotency key.
    Unavailable(String),
    UnknownIntent(String),
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::Declined(msg) => write!(f, "declined: {msg}"),
            PaymentError::Unavailable(msg) => write!(f, "processor unavailable: {msg}"),
            PaymentError::UnknownIntent(id) => write!(f, "unknown payment intent: {id}"),
        }
    }
}

impl std::error::Error for PaymentError {}

/// The payment processor collaborator. The engine only orchestrates these
/// verbs against intents it owns.
///
/// `Ok(false)` from the mutating verbs means the processor refused the
/// transition; `Err` means the call itself failed.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn authorize(
        &self,
        amount: Money,
        customer: Ulid,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn capture(&self, intent_id: &str) -> Result<bool, PaymentError>;

    async fn cancel_authorization(&self, intent_id: &str) -> Result<bool, PaymentError>;

    async fn refund(&self, intent_id: &str) -> Result<bool, PaymentError>;

    async fn get_status(&self, intent_id: &str) -> Result<IntentStatus, PaymentError>;
}

/// In-process processor that keeps intents in memory. Honors idempotency
/// keys and supports injected failures for exercising the engine's
/// reconciliation paths.
#[derive(Default)]
pub struct SandboxProcessor {
    intents: DashMap<String, PaymentIntent>,
    idempotency: DashMap<String, String>,
    /// Remaining injected hard errors per verb.
    failures: DashMap<PaymentVerb, u32>,
    /// Remaining injected refusals per verb.
    declines: DashMap<PaymentVerb, u32>,
    calls: DashMap<PaymentVerb, u64>,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls of `verb` fail with `Unavailable`.
    pub fn fail_next(&self, verb: PaymentVerb, n: u32) {
        *self.failures.entry(verb).or_default() += n;
    }

    /// Make the next `n` calls of `verb` be refused by the processor.
    pub fn decline_next(&self, verb: PaymentVerb, n: u32) {
        *self.declines.entry(verb).or_default() += n;
    }

    pub fn calls(&self, verb: PaymentVerb) -> u64 {
        self.calls.get(&verb).map(|c| *c).unwrap_or(0)
    }

    pub fn intent(&self, id: &str) -> Option<PaymentIntent> {
        self.intents.get(id).map(|e| e.value().clone())
    }

    pub fn intent_count(&self) -> usize {
        self.intents.len()
    }

    fn record(&self, verb: PaymentVerb) {
        *self.calls.entry(verb).or_default() += 1;
    }

    fn take(counters: &DashMap<PaymentVerb, u32>, verb: PaymentVerb) -> bool {
        match counters.get_mut(&verb) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn injected(&self, verb: PaymentVerb) -> Result<bool, PaymentError> {
        self.record(verb);
        if Self::take(&self.failures, verb) {
            return Err(PaymentError::Unavailable(format!("injected {} failure", verb.label())));
        }
        Ok(Self::take(&self.declines, verb))
    }

    /// Move an intent from `from` to `to`. Already being in `to` counts as success.
    fn transition(
        &self,
        intent_id: &str,
        from: IntentStatus,
        to: IntentStatus,
    ) -> Result<bool, PaymentError> {
        let mut intent = self
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| PaymentError::UnknownIntent(intent_id.to_string()))?;
        if intent.status == to {
            return Ok(true);
        }
        if intent.status != from {
            return Ok(false);
        }
        intent.status = to;
        Ok(true)
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn authorize(
        &self,
        amount: Money,
        customer: Ulid,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let declined = self.injected(PaymentVerb::Authorize)?;
        if let Some(existing) = self.idempotency.get(idempotency_key)
            && let Some(intent) = self.intents.get(existing.value())
        {
            return Ok(intent.value().clone());
        }
        if declined {
            return Err(PaymentError::Declined("card declined".into()));
        }
        if amount <= 0 {
            return Err(PaymentError::Declined(format!("invalid amount {amount}")));
        }

        let entry = self.idempotency.entry(idempotency_key.to_string());
        let intent_id = match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => e.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let id = format!("pi_{}", Ulid::new());
                self.intents.insert(
                    id.clone(),
                    PaymentIntent {
                        id: id.clone(),
                        amount,
                        customer,
                        status: IntentStatus::RequiresCapture,
                    },
                );
                e.insert(id.clone());
                id
            }
        };
        self.intent(&intent_id)
            .ok_or(PaymentError::UnknownIntent(intent_id))
    }

    async fn capture(&self, intent_id: &str) -> Result<bool, PaymentError> {
        if self.injected(PaymentVerb::Capture)? {
            return Ok(false);
        }
        self.transition(intent_id, IntentStatus::RequiresCapture, IntentStatus::Succeeded)
    }

    async fn cancel_authorization(&self, intent_id: &str) -> Result<bool, PaymentError> {
        if self.injected(PaymentVerb::CancelAuthorization)? {
            return Ok(false);
        }
        self.transition(intent_id, IntentStatus::RequiresCapture, IntentStatus::Canceled)
    }

    async fn refund(&self, intent_id: &str) -> Result<bool, PaymentError> {
        if self.injected(PaymentVerb::Refund)? {
            return Ok(false);
        }
        self.transition(intent_id, IntentStatus::Succeeded, IntentStatus::Refunded)
    }

    async fn get_status(&self, intent_id: &str) -> Result<IntentStatus, PaymentError> {
        self.injected(PaymentVerb::GetStatus)?;
        self.intent(intent_id)
            .map(|i| i.status)
            .ok_or_else(|| PaymentError::UnknownIntent(intent_id.to_string()))
    }
}
