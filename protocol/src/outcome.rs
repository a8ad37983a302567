//! # Outcome Classification
//!
//! A decoded response is a pair of numbers we did not choose: the result
//! code `Ds_Response` and the transaction type `Ds_TransactionType`. This
//! module turns that pair into one of a closed set of outcomes and, for
//! the outcomes that change anything, into a [`StatusUpdate`] for the
//! merchant's payment record.
//!
//! ```text
//!   code < 100,  type 0      AuthorizedPayment   -> confirmed, captured, auth code
//!   code < 100,  type 1      AuthorizedPreauth   -> preauth
//!   code < 100,  other       Unrecognized        (logged only)
//!   code == 900, type 3      AuthorizedRefund    -> refunded
//!   code == 900, other       Unrecognized        (logged only)
//!   code > 100,  != 900      Rejected            -> rejected, "Ds_Response was N"
//!   code == 100              no branch           (nothing happens)
//! ```
//!
//! Code 100 is not a typo. The gateway documentation leaves it between the
//! authorised and rejected ranges, so it is reported as "no outcome" and
//! the record stays as it was.
//!
//! Classification is pure. Applying the result is the caller's job, through
//! the [`PaymentRecord`] capability.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::envelope::{DecodedResponse, MerchantParameters, TransactionType};
use crate::error::RedsysError;

/// Upper bound (exclusive) of the authorised range.
pub const AUTHORIZED_UPPER_BOUND: i64 = 100;

/// The code for an authorised refund or confirmation.
pub const REFUND_AUTHORIZED_CODE: i64 = 900;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Payment lifecycle as seen by the merchant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Created, customer not yet sent to the gateway.
    #[default]
    Waiting,
    /// Funds held, not captured.
    Preauth,
    /// Funds captured.
    Confirmed,
    /// Declined or failed at the gateway.
    Rejected,
    /// Returned to the customer.
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Preauth => "preauth",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What an authenticated response means for the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    AuthorizedPayment {
        captured_amount: Amount,
        authorization_code: String,
    },
    AuthorizedPreauth,
    AuthorizedRefund,
    Rejected {
        response_code: i64,
    },
    /// Authorised range, but a transaction type we do not act on.
    Unrecognized {
        response_code: i64,
        transaction_type: TransactionType,
    },
}

impl PaymentOutcome {
    /// Short, stable name. Used as a metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AuthorizedPayment { .. } => "authorized_payment",
            Self::AuthorizedPreauth => "authorized_preauth",
            Self::AuthorizedRefund => "authorized_refund",
            Self::Rejected { .. } => "rejected",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Whether the customer should be sent to the success page.
    ///
    /// Unrecognised outcomes count as success: the gateway said the
    /// operation was authorised, we just have nothing to record.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// The mutation to apply to the payment record, if any. `diagnostics`
    /// is attached verbatim as the record's extra data.
    pub fn status_update(&self, diagnostics: &MerchantParameters) -> Option<StatusUpdate> {
        let update = match self {
            Self::AuthorizedPayment {
                captured_amount,
                authorization_code,
            } => StatusUpdate {
                status: PaymentStatus::Confirmed,
                message: None,
                captured_amount: Some(*captured_amount),
                transaction_id: Some(authorization_code.clone()),
                extra_data: diagnostics.clone(),
            },
            Self::AuthorizedPreauth => StatusUpdate::new(PaymentStatus::Preauth, diagnostics),
            Self::AuthorizedRefund => StatusUpdate::new(PaymentStatus::Refunded, diagnostics),
            Self::Rejected { response_code } => StatusUpdate {
                message: Some(format!("Ds_Response was {}", response_code)),
                ..StatusUpdate::new(PaymentStatus::Rejected, diagnostics)
            },
            Self::Unrecognized { .. } => return None,
        };
        Some(update)
    }
}

impl fmt::Display for PaymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizedPayment {
                captured_amount,
                authorization_code,
            } => write!(
                f,
                "authorized payment of {} (authorisation {})",
                captured_amount, authorization_code
            ),
            Self::AuthorizedPreauth => write!(f, "authorized preauthorisation"),
            Self::AuthorizedRefund => write!(f, "authorized refund"),
            Self::Rejected { response_code } => write!(f, "rejected (Ds_Response {})", response_code),
            Self::Unrecognized {
                response_code,
                transaction_type,
            } => write!(
                f,
                "unrecognized (Ds_Response {}, transaction type {})",
                response_code, transaction_type
            ),
        }
    }
}

/// Classify an authenticated response.
///
/// Returns `Ok(None)` for response code 100, which no rule covers.
///
/// # Errors
///
/// [`RedsysError::MissingRequiredField`] when an authorised payment lacks
/// `Ds_Amount` or `Ds_AuthorisationCode`; [`RedsysError::InvalidAmount`]
/// when `Ds_Amount` is not an integer.
pub fn classify(response: &DecodedResponse) -> Result<Option<PaymentOutcome>, RedsysError> {
    let code = response.response_code();
    let transaction_type = response.transaction_type();

    let outcome = if code < AUTHORIZED_UPPER_BOUND {
        match transaction_type {
            TransactionType::Payment => PaymentOutcome::AuthorizedPayment {
                captured_amount: response.amount()?,
                authorization_code: response.authorisation_code()?,
            },
            TransactionType::Preauthorization => PaymentOutcome::AuthorizedPreauth,
            other => PaymentOutcome::Unrecognized {
                response_code: code,
                transaction_type: other.clone(),
            },
        }
    } else if code == REFUND_AUTHORIZED_CODE {
        match transaction_type {
            TransactionType::Refund => PaymentOutcome::AuthorizedRefund,
            other => PaymentOutcome::Unrecognized {
                response_code: code,
                transaction_type: other.clone(),
            },
        }
    } else if code > AUTHORIZED_UPPER_BOUND {
        PaymentOutcome::Rejected {
            response_code: code,
        }
    } else {
        debug!(code, %transaction_type, "response code falls between authorised and rejected ranges");
        return Ok(None);
    };

    match &outcome {
        PaymentOutcome::Unrecognized {
            response_code,
            transaction_type,
        } => warn!(
            response_code,
            %transaction_type,
            "authorised response with unrecognised transaction type"
        ),
        PaymentOutcome::Rejected { response_code } => {
            info!(response_code, "gateway rejected the operation")
        }
        other => debug!(outcome = other.label(), "classified gateway response"),
    }

    Ok(Some(outcome))
}

// ---------------------------------------------------------------------------
// Record capability
// ---------------------------------------------------------------------------

/// A status change to apply to a payment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PaymentStatus,
    /// Human-readable reason, set for rejections.
    pub message: Option<String>,
    pub captured_amount: Option<Amount>,
    /// The gateway's authorisation code.
    pub transaction_id: Option<String>,
    /// The full decoded response, for diagnostics.
    pub extra_data: MerchantParameters,
}

impl StatusUpdate {
    fn new(status: PaymentStatus, diagnostics: &MerchantParameters) -> Self {
        Self {
            status,
            message: None,
            captured_amount: None,
            transaction_id: None,
            extra_data: diagnostics.clone(),
        }
    }
}

/// What the provider needs from the merchant's payment storage.
///
/// The provider reads through this trait to build requests and writes
/// through [`apply_outcome`](PaymentRecord::apply_outcome) only after a
/// notification has authenticated and classified.
pub trait PaymentRecord {
    /// Stable identifier, used to synthesise order numbers.
    fn payment_id(&self) -> String;

    /// Explicit order number, if the merchant assigned one.
    fn order_number(&self) -> Option<String> {
        None
    }

    /// Amount to charge.
    fn total(&self) -> Amount;

    /// Currency for this payment, if it overrides the provider default.
    fn currency(&self) -> Option<String> {
        None
    }

    /// Amount captured so far.
    fn captured_amount(&self) -> Amount;

    /// Where the gateway sends its notification for this payment.
    fn process_url(&self) -> String;

    fn success_url(&self) -> String;

    fn failure_url(&self) -> String;

    fn apply_outcome(&mut self, update: StatusUpdate);
}
