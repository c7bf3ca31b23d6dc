pub mod checksum;
pub mod config;
pub mod interface;
pub mod packet;
pub mod scenario;

pub use interface::{Channel, DeliverySink, RecordingChannel};
pub use packet::{Endpoint, ErrorFlag, Segment, SegmentHeader};

pub use config::{
    ChannelConfig, ChannelConfigOverride, SessionConfig, SessionConfigOverride, Variant,
};
pub use scenario::{TestAction, TestAssertion, TestScenario};
