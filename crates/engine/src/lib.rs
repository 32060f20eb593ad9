//! RoomLedger Engine
//!
//! Booking/payment lifecycle services on top of Postgres: draft creation and
//! billing, manual and gateway-driven settlement, idempotent webhook
//! ingestion, and the gateway client used to mint payment instruments. The
//! time-triggered sweeps that drive these services live in
//! `roomledger-worker`; the pure billing arithmetic lives in
//! `roomledger-billing`.

pub mod bookings;
pub mod gateway;
pub mod notify;
pub mod payments;
pub mod webhook;

pub use bookings::{BookingService, CreateBookingRequest, DraftBooking, RenewalOutcome};
pub use gateway::{GatewayClient, GatewayConfig, InstrumentResponse};
pub use notify::Notifier;
pub use payments::{
    InquiryItem, InquiryOutcome, PayOutcome, PayRequest, PaymentService, StartPaymentOutcome,
    StartPaymentRequest,
};
pub use webhook::{IngestOutcome, WebhookService};
