//! Server-sent event fan-out.
//!
//! [`EventHub`] owns the registry of streaming clients. Non-critical event
//! kinds are rate limited per client by the [`ThrottleManager`].

mod hub;
mod throttle;
mod types;

pub use hub::{ClientConnection, ClientInfo, ConnectionState, EventHub, HubError, Subscription};
pub use throttle::{SendFn, ThrottleKey, ThrottleManager};
pub use types::{
    ConnectedPayload, EventFrame, EventKind, FlushPolicy, PingPayload, ServerEvent, StatusPayload,
    TicketsUpdatedPayload,
};
