//! Test support: a scriptable in-process AirTunes receiver and
//! container fixtures

mod fixtures;
mod mock_receiver;

pub use fixtures::M4aFixture;
pub use mock_receiver::{MockReceiver, MockReceiverConfig, MockReceiverState, RecordedRequest};

#[cfg(test)]
pub(crate) use mock_receiver::try_parse_request;
