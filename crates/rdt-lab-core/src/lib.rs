pub mod error;
pub mod policy;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod timer;
pub mod window;

pub use error::{Result, TransportError};
pub use policy::{AckMode, Policy, ReceiverMode, Recovery};
pub use receiver::{ReceiverAssembler, ReceiverStats};
pub use sender::{RdtSender, SenderStats};
pub use sink::{DEFAULT_OUTPUT, FileSink, MemorySink};
pub use timer::{TimerHandle, TimerService};
pub use window::{SenderWindow, WindowStats};
