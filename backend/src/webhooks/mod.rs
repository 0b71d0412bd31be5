// Webhook Notifications
//
// Delivers tenant events to externally registered endpoints with HMAC
// signatures, exponential-backoff retries and an outbound address policy.

pub mod dispatcher;
pub mod endpoint;
pub mod signing;
pub mod ssrf;

pub use dispatcher::{
    error_chain, DeliveryOutcome, DeliveryReport, DispatchError, DispatcherConfig, RealtimeBroadcaster,
    RetryPolicy, WebhookDispatcher,
};
pub use endpoint::{endpoints_from_settings, WebhookEndpoint, WebhookSettings};
pub use signing::{sign_payload, signature_header, verify_signature, EVENT_HEADER, SIGNATURE_HEADER};
pub use ssrf::{build_client, check_url, is_blocked_ip, NetworkPolicy, SsrfError, SsrfSafeResolver};
