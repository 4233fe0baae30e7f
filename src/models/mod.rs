//! Core data models for the chunked upload protocol and analysis cache.
//!
//! These types cover both sides of the wire: the JSON request/response
//! bodies exchanged with clients and the server-held session and cache
//! entries. Wire types serialize as camelCase via `serde`.

pub mod session;
pub mod stored_file;
