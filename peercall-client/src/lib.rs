pub mod config;
pub mod error;
pub mod session;
pub mod surface;

pub use session::{CallSession, CallState, SessionHandle};
