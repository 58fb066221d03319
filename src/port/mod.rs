//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! ```text
//!                 ┌─────────────────────────┐
//!                 │       Application       │
//!                 │  connection / engine /  │
//!                 │  stake controller       │
//!                 └────────────┬────────────┘
//!        ┌─────────────────────┼─────────────────────┐
//!        ▼                     ▼                     ▼
//!  ┌───────────┐      ┌─────────────────┐     ┌────────────┐
//!  │ Transport │      │ ExecutionBackend│     │ TradeLedger│
//!  │ (venue ws)│      │ (live / paper)  │     │ (sqlite)   │
//!  └───────────┘      └─────────────────┘     └────────────┘
//! ```

pub mod outbound;

pub use outbound::execution::{ContractMonitor, ExecutionBackend};
pub use outbound::ledger::{HistoryQuery, TradeLedger};
pub use outbound::transport::{
    ApiToken, Envelope, Inbound, InboundBody, OpenContract, Outbound, Transport, TransportFrame,
    VenueError,
};
