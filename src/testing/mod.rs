//! Test doubles for the RAOP receiver
//!
//! [`MockRaopSender`] drives the UDP side of a session, [`MockSupply`]
//! stands in for the pipeline and [`NetworkSimulator`] adds loss and
//! reordering.

pub mod mock_sender;
pub mod mock_supply;
pub mod network_sim;

pub use mock_sender::{MockRaopSender, MockSenderConfig, MockSenderError, plain_payload};
pub use mock_supply::{MockSupply, RecordedMsg};
pub use network_sim::NetworkSimulator;

/// Install a test tracing subscriber once; `RUST_LOG` controls the filter
#[cfg(test)]
pub(crate) fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // Another test may have installed it already
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
