//! # switchboard-mock
//!
//! In-process reference backend for Switchboard, plus helpers for testing
//! code that uses the facade or any other backend.
//!
//! - **MockProvider** - Connection lifecycle with simulated latency and faults
//! - **MockChannel** - Pub/sub with wildcard handlers and bounded history
//! - **MockPresence** - One local member per channel, plus injected remote members
//! - **testing** - `wait_for`, `MessageRecorder`, message fixtures
//! - **conformance** - Checks any backend can run against itself
//!
//! Every handler call is deferred: nothing a handler does runs on the stack
//! of the `publish`, `connect` or presence call that triggered it. Deliveries
//! from one provider run one at a time in the order they were scheduled. Use
//! [`MockProvider::settled`] to wait for outstanding deliveries.

pub mod channel;
pub mod conformance;
pub mod presence;
pub mod provider;
pub mod testing;

pub use channel::MockChannel;
pub use conformance::check_provider;
pub use presence::MockPresence;
pub use provider::{MockProvider, MockProviderBuilder, MOCK_PROVIDER_NAME, MOCK_PROVIDER_VERSION};
