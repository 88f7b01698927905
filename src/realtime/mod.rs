//! Per-connection orchestration: claims decoding, the project/user
//! directory seam, the RPC wire codec, and `RealTimeManager`.
//!
//! Grounded in a connection-lifecycle dispatch shape (bootstrap once, then
//! dispatch by message kind), generalized to this deployment's bootstrap
//! and five RPC actions.

pub mod access;
pub mod claims;
pub mod manager;
pub mod rpc;

pub use access::{PrivilegeLevel, ProjectAccess, ProjectDetails, StubProjectAccess, UserPublicInfo};
pub use claims::{decode_bootstrap_jwt, BootstrapClaims};
pub use manager::{BootstrapWsResponse, RealTimeManager};
pub use rpc::{decode_request, encode_broadcast, encode_response, rejection_response, RPCRequest};
