//! Push delivery layer.
//!
//! Subscription bookkeeping, the notification payload shape, the transport
//! abstraction with its error taxonomy, and the action-token signer embedded
//! in alarm payloads.

mod channel;
mod payload;
mod subscription;
mod token;

pub use channel::{HttpPushChannel, LogOnlyPushChannel, PushChannel, PushError};
pub use payload::{PayloadAction, PushPayload};
pub use subscription::{collapse_per_device, PushSubscription, SubscriptionStore};
pub use token::{ActionClaims, ActionTokenSigner};
