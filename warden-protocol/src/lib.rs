//! Wire protocol, access control and request dispatch shared by the
//! supervisor and its workers.

pub mod access;
pub mod client;
pub mod errors;
pub mod protocol;
pub mod server;
