//! Webhook ingestion
//!
//! Gateway callbacks are the source of truth for instrument settlement.
//! Ingestion is two-phase: the raw event is committed to the inbox first
//! (outside the processing transaction), then processed in one transaction
//! that locks the waiting bills, reconciles amounts and fans the reported
//! status out. The inbox unique key on (provider, event_id) makes redelivery
//! a no-op, and a failed processing transaction leaves the inbox row
//! unprocessed for later replay.

use serde_json::Value;
use sqlx::PgPool;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{info, warn};
use uuid::Uuid;

use roomledger_shared::{
    AttemptStatus, Clock, LedgerError, LedgerResult, Payment, PaymentStatus, PaymentTransaction,
    WebhookInboxRow, PROVIDER_NAME,
};

use crate::gateway::parse_gateway_timestamp;
use crate::payments::{to_whole_units, PAYMENT_COLUMNS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Event id already in the inbox; nothing was touched.
    Duplicate,
    /// Settlement fanned out to the booking's waiting bills.
    Processed {
        status: PaymentStatus,
        payments: usize,
    },
    /// Recorded but carrying a status the engine does not act on.
    Ignored { status: String },
}

impl IngestOutcome {
    pub fn message(&self) -> String {
        match self {
            IngestOutcome::Duplicate => "duplicate webhook (ignored)".to_string(),
            IngestOutcome::Processed { status, payments } => {
                format!("{} payment(s) marked {}", payments, status)
            }
            IngestOutcome::Ignored { status } => {
                format!("webhook status {} recorded, no action", status)
            }
        }
    }
}

#[derive(Clone)]
pub struct WebhookService {
    pool: PgPool,
    clock: Clock,
}

impl WebhookService {
    pub fn new(pool: PgPool, clock: Clock) -> Self {
        Self { pool, clock }
    }

    /// Accepts one raw gateway event.
    pub async fn accept(&self, payload: Value) -> LedgerResult<IngestOutcome> {
        let event_id = derive_event_id(&payload);

        // Inbox insert commits on its own so a later processing failure still
        // leaves the delivery recorded.
        let inbox_id: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO webhook_inbox (id, provider, event_id, payload, processed, received_at) \
             VALUES ($1, $2, $3, $4, FALSE, $5) \
             ON CONFLICT (provider, event_id) DO NOTHING \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(PROVIDER_NAME)
        .bind(&event_id)
        .bind(&payload)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        let Some(inbox_id) = inbox_id else {
            info!(event_id = %event_id, "duplicate webhook delivery ignored");
            return Ok(IngestOutcome::Duplicate);
        };

        let provider_payment_id = json_str(&payload, &["data", "payment_id"])
            .or_else(|| json_str(&payload, &["data", "id"]))
            .ok_or_else(|| {
                LedgerError::InvalidTransaction("webhook missing payment id".to_string())
            })?;
        let pr_id = json_str(&payload, &["data", "payment_request_id"]);
        let reference = json_str(&payload, &["data", "reference_id"]).ok_or_else(|| {
            LedgerError::InvalidTransaction("webhook missing reference_id".to_string())
        })?;
        let booking_id = Uuid::parse_str(&reference).map_err(|_| {
            LedgerError::InvalidTransaction(format!("unrecognized reference_id {}", reference))
        })?;
        let status = json_str(&payload, &["data", "status"])
            .or_else(|| json_str(&payload, &["status"]))
            .ok_or_else(|| {
                LedgerError::InvalidTransaction("webhook missing status".to_string())
            })?
            .to_ascii_uppercase();
        let channel_code = json_str(&payload, &["data", "channel_code"]);
        let currency = json_str(&payload, &["data", "currency"]);
        let reported_amount = json_i64(&payload, &["data", "request_amount"]).ok_or_else(|| {
            LedgerError::InvalidTransaction("webhook missing request_amount".to_string())
        })?;
        let paid_at = json_str(&payload, &["data", "paid_at"])
            .or_else(|| json_str(&payload, &["data", "updated"]))
            .and_then(|s| parse_gateway_timestamp(&s))
            .unwrap_or_else(|| self.clock.now());

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE booking_id = $1 AND status = $2 AND kind IN ('DEPOSIT', 'RENT') \
             ORDER BY created_at \
             FOR UPDATE"
        );
        let waiting: Vec<Payment> = sqlx::query_as(&sql)
            .bind(booking_id)
            .bind(PaymentStatus::WaitingForPayment)
            .fetch_all(&mut *tx)
            .await?;
        if waiting.is_empty() {
            return Err(LedgerError::InvalidTransaction(format!(
                "no WAITING_FOR_PAYMENT bills for booking {}",
                booking_id
            )));
        }

        let mut expected: i64 = 0;
        for p in &waiting {
            expected += to_whole_units(p.amount)?;
        }
        if reported_amount != expected {
            return Err(LedgerError::InvalidTransaction(format!(
                "amount mismatch for booking {}: webhook reports {} but {} is waiting",
                booking_id, reported_amount, expected
            )));
        }

        // Each bill must carry exactly one expectation row from the inquiry
        // step; anything else means the ledger is corrupt and the whole event
        // must abort.
        for payment in &waiting {
            let rows: Vec<PaymentTransaction> = sqlx::query_as(
                "SELECT id, payment_id, provider, provider_payment_id, payment_request_id, \
                        reference_id, channel_code, amount, total_amount, currency, status, \
                        paid_at, payload, created_at \
                 FROM payment_transactions WHERE payment_id = $1",
            )
            .bind(payment.id)
            .fetch_all(&mut *tx)
            .await?;
            let tx_id = match rows.as_slice() {
                [one] => one.id,
                [] => {
                    return Err(LedgerError::Consistency(format!(
                        "missing expectation transaction for payment {}",
                        payment.id
                    )))
                }
                _ => {
                    return Err(LedgerError::Consistency(format!(
                        "multiple transactions for payment {}",
                        payment.id
                    )))
                }
            };

            // Identity fields only backfill; a transaction never switches to a
            // different gateway object.
            sqlx::query(
                "UPDATE payment_transactions \
                 SET provider_payment_id = COALESCE(provider_payment_id, $1), \
                     payment_request_id = COALESCE(payment_request_id, $2), \
                     reference_id = COALESCE(reference_id, $3), \
                     channel_code = COALESCE($4, channel_code), \
                     currency = COALESCE($5, currency), \
                     status = $6, paid_at = $7, payload = $8 \
                 WHERE id = $9",
            )
            .bind(&provider_payment_id)
            .bind(&pr_id)
            .bind(&reference)
            .bind(&channel_code)
            .bind(&currency)
            .bind(&status)
            .bind(paid_at)
            .bind(&payload)
            .bind(tx_id)
            .execute(&mut *tx)
            .await?;
        }

        let payment_ids: Vec<Uuid> = waiting.iter().map(|p| p.id).collect();
        let now = self.clock.now();
        let outcome = match settlement_for(&status) {
            Some(settled) => {
                let with_paid_at = settled == PaymentStatus::Paid;
                sqlx::query(
                    "UPDATE payments \
                     SET status = $1, \
                         paid_at = CASE WHEN $2 THEN $3 ELSE paid_at END, \
                         provider_payment_id = COALESCE(provider_payment_id, $4), \
                         pr_id = COALESCE(pr_id, $5), \
                         updated_at = $6 \
                     WHERE id = ANY($7) AND status = $8",
                )
                .bind(settled)
                .bind(with_paid_at)
                .bind(paid_at)
                .bind(&provider_payment_id)
                .bind(&pr_id)
                .bind(now)
                .bind(&payment_ids)
                .bind(PaymentStatus::WaitingForPayment)
                .execute(&mut *tx)
                .await?;

                let attempt_status = match settled {
                    PaymentStatus::Paid => AttemptStatus::Paid,
                    PaymentStatus::Expired => AttemptStatus::Expired,
                    _ => AttemptStatus::Failed,
                };
                sqlx::query(
                    "UPDATE payment_attempts SET status = $1, updated_at = $2 \
                     WHERE booking_id = $3 AND status = $4",
                )
                .bind(attempt_status)
                .bind(now)
                .bind(booking_id)
                .bind(AttemptStatus::WaitingForPayment)
                .execute(&mut *tx)
                .await?;

                IngestOutcome::Processed {
                    status: settled,
                    payments: payment_ids.len(),
                }
            }
            None => {
                warn!(event_id = %event_id, %status, "webhook status not actionable");
                IngestOutcome::Ignored { status }
            }
        };

        sqlx::query("UPDATE webhook_inbox SET processed = TRUE WHERE id = $1")
            .bind(inbox_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(
            event_id = %event_id,
            booking_id = %booking_id,
            outcome = %outcome.message(),
            "webhook ingested"
        );
        Ok(outcome)
    }

    /// Inbox rows whose processing transaction never committed, oldest first.
    /// Operators replay these through [`WebhookService::accept`]-equivalent
    /// handling after fixing the underlying fault.
    pub async fn unprocessed(&self, limit: i64) -> LedgerResult<Vec<WebhookInboxRow>> {
        let rows = sqlx::query_as(
            "SELECT id, provider, event_id, payload, processed, received_at \
             FROM webhook_inbox WHERE processed = FALSE \
             ORDER BY received_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Settled payment status for a reported gateway status, if the engine acts
/// on it.
fn settlement_for(status: &str) -> Option<PaymentStatus> {
    match status {
        "SUCCEEDED" | "PAID" => Some(PaymentStatus::Paid),
        "EXPIRED" => Some(PaymentStatus::Expired),
        "FAILED" => Some(PaymentStatus::Failed),
        _ => None,
    }
}

/// Event identity: explicit event ids first, then the gateway payment id,
/// then a structural hash so even id-less payloads dedupe on exact
/// redelivery.
pub(crate) fn derive_event_id(payload: &Value) -> String {
    const PATHS: [&[&str]; 4] = [
        &["id"],
        &["event_id"],
        &["data", "payment_id"],
        &["data", "id"],
    ];
    for path in PATHS {
        if let Some(s) = json_str(payload, path) {
            return s;
        }
    }
    let mut hasher = DefaultHasher::new();
    payload.to_string().hash(&mut hasher);
    format!("HASH-{:016x}", hasher.finish())
}

fn json_str(v: &Value, path: &[&str]) -> Option<String> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    match cur {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_i64(v: &Value, path: &[&str]) -> Option<i64> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    match cur {
        Value::Number(n) => n.as_i64().or_else(|| {
            // Gateways sometimes report amounts as floats; accept only exact
            // integers.
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
