pub mod client;
pub mod error;
pub mod transport;

pub use peercall_protocol as protocol;
