pub mod engine;
pub mod request;
pub mod session;
pub mod transport;

pub use engine::ReportingEngine;
pub use session::SessionStore;
pub use transport::{TlsTransport, Transport};
