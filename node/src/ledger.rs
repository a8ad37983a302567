//! In-memory payment ledger backing the HTTP service.
//!
//! Records live only as long as the process. A merchant running this for
//! real would put a database behind [`PaymentRecord`]; the provider does not
//! care where the record comes from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use redsys_protocol::{Amount, MerchantParameters, PaymentRecord, PaymentStatus, StatusUpdate};

/// One payment as the node stores it.
#[derive(Debug, Clone)]
pub struct StoredPayment {
    pub id: u64,
    pub order_number: Option<String>,
    pub total: Amount,
    pub currency: Option<String>,
    pub status: PaymentStatus,
    pub captured_amount: Amount,
    pub transaction_id: Option<String>,
    pub message: Option<String>,
    /// Last decoded gateway response.
    pub extra_data: Option<MerchantParameters>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    base_url: String,
}

impl StoredPayment {
    /// A fresh `waiting` payment whose callback URLs hang off `base_url`.
    pub fn new(
        id: u64,
        total: Amount,
        currency: Option<String>,
        order_number: Option<String>,
        base_url: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            order_number,
            total,
            currency,
            status: PaymentStatus::Waiting,
            captured_amount: Amount::ZERO,
            transaction_id: None,
            message: None,
            extra_data: None,
            created_at: now,
            modified_at: now,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, leaf: &str) -> String {
        format!("{}/payments/{}/{}", self.base_url, self.id, leaf)
    }
}

impl PaymentRecord for StoredPayment {
    fn payment_id(&self) -> String {
        self.id.to_string()
    }

    fn order_number(&self) -> Option<String> {
        self.order_number.clone()
    }

    fn total(&self) -> Amount {
        self.total
    }

    fn currency(&self) -> Option<String> {
        self.currency.clone()
    }

    fn captured_amount(&self) -> Amount {
        self.captured_amount
    }

    fn process_url(&self) -> String {
        self.url("process")
    }

    fn success_url(&self) -> String {
        self.url("success")
    }

    fn failure_url(&self) -> String {
        self.url("failure")
    }

    fn apply_outcome(&mut self, update: StatusUpdate) {
        self.status = update.status;
        if let Some(message) = update.message {
            self.message = Some(message);
        }
        if let Some(captured) = update.captured_amount {
            self.captured_amount = captured;
        }
        if let Some(transaction_id) = update.transaction_id {
            self.transaction_id = Some(transaction_id);
        }
        self.extra_data = Some(update.extra_data);
        self.modified_at = Utc::now();
    }
}

/// Thread-safe map of payments keyed by a sequential id.
#[derive(Debug)]
pub struct PaymentLedger {
    next_id: AtomicU64,
    payments: RwLock<HashMap<u64, StoredPayment>>,
    base_url: String,
}

impl PaymentLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            payments: RwLock::new(HashMap::new()),
            base_url: base_url.into(),
        }
    }

    /// Store a new payment and return a copy of it.
    pub fn create(
        &self,
        total: Amount,
        currency: Option<String>,
        order_number: Option<String>,
    ) -> StoredPayment {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payment = StoredPayment::new(id, total, currency, order_number, &self.base_url);
        self.payments.write().insert(id, payment.clone());
        payment
    }

    pub fn get(&self, id: u64) -> Option<StoredPayment> {
        self.payments.read().get(&id).cloned()
    }

    /// Run `f` against the stored payment under the write lock.
    ///
    /// `f` must not block; the lock is held for its whole duration.
    pub fn update<R>(&self, id: u64, f: impl FnOnce(&mut StoredPayment) -> R) -> Option<R> {
        self.payments.write().get_mut(&id).map(f)
    }

    /// Number of payments stored.
    pub fn count(&self) -> usize {
        self.payments.read().len()
    }
}
