pub mod channel;
pub mod scenario_runner;
pub mod session;
pub mod trace;
pub mod workload;

pub use channel::{LinkEvent, LinkStats, UnreliableChannel};
pub use session::Session;
pub use trace::SessionReport;
