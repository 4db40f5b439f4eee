//! Linux-only primitives shared by the warden supervisor and its workers:
//! authenticated datagram sockets, kernel-attested peer credentials and
//! process signalling.

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("warden-unix requires SO_PASSCRED/SCM_CREDENTIALS (Linux)");

pub mod credentials;
pub mod process;
pub mod socket;

pub use credentials::PeerCredentials;
pub use socket::{AuthSocket, Datagram, TransportError};
