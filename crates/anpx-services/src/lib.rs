//! anpx-services — domain logic shared by the Gateway and Receiver: the
//! connection registry, path router, pending-request table, reconnect state
//! machine, and the DID-WBA/path-oracle trait boundaries. No axum, no
//! WebSocket transport — those live in `anpx-gateway`/`anpx-receiver`.

pub mod oracle;
pub mod pending;
pub mod reconnect;
pub mod registry;
pub mod router;

pub use oracle::{
    AllowListVerifier, AuthError, DidWbaSigner, DidWbaVerifier, PathOracle, StaticDidSigner,
    StaticPathOracle,
};
pub use pending::{DispatchError, DispatchResult, PendingTable};
pub use reconnect::{ReconnectManager, ReconnectPolicy, ReconnectStats, ReconnectState};
pub use registry::{
    CapacityError, ConnectionInfo, ConnectionRegistry, ConnectionState, OutboundItem,
    RegistrationError, SweepOutcome,
};
pub use router::{PathRouter, RouterStats};
