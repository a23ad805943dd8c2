//! Threshold session coordinator core library.
//!
//! The coordinator relays opaque protocol messages between the parties of DKG and
//! threshold-signing sessions; the round drivers run one party's side against it.

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod frost;
pub mod logging;
pub mod session;
pub mod types;
pub mod wire;

pub use config::{CoordinatorConfig, PollPolicy};
pub use coordinator::{Coordinator, Health};
pub use driver::{
    CoordinatorApi, HttpCoordinator, LocalCoordinator, RoundDriver, SignedPayload, SigningRequest,
};
pub use error::{CoordinatorError, DriverError, RoundError};
pub use frost::{FrostKeygen, FrostSigner, KeyShare};
pub use types::{Message, Outbound, PartyId, Round, SessionKind};
