//! Venue integration: JSON-over-WebSocket transport and live execution.

pub mod dto;
pub mod executor;
pub mod stream;

pub use executor::VenueBackend;
pub use stream::VenueStream;
