//! Redis-backed per-project presence hash, coalesced room-change
//! publishing, and the lexicographic age encoding it rides on.

pub mod age_encoding;
pub mod presence;

pub use age_encoding::{decode_age, encode_age};
pub use presence::{ClientPosition, ClientTracking, ConnectedClient, PresenceEntry, RoomChange};
