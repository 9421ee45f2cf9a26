//! Channel senders for TaskCourier.
//!
//! Two channels ship today: durable email (retried on transient failure) and
//! best-effort realtime push (dropped when nobody is connected). A channel's
//! retry eligibility is part of its sender's declared policy, not a branch in
//! the engine.

pub mod email;
pub mod realtime;
pub mod render;
pub mod sender;

pub use email::{EmailSender, MailTransport, ResendMailTransport};
pub use realtime::{PublishResult, RealtimePayload, RealtimeSender, SubscriberRegistry};
pub use sender::{ChannelSender, SendOutcome};
