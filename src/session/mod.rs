//! Session server: one bound local socket, one running RPC endpoint.

mod server;

pub use server::{SessionHandle, SessionServer};
