//! Application Ports
//!
//! ## Driven Ports (Outbound)
//!
//! - `OrderedStore`: Sorted-set series store
//! - `StoreConnector`: Produces connected store handles
//! - `HealthSink`: Destination for health events
//! - `Clock`: Evaluation instant

mod clock_port;
mod health_sink_port;
mod store_port;

pub use clock_port::{Clock, ManualClock, SystemClock, utc_from_secs};
#[cfg(test)]
pub use health_sink_port::MockHealthSink;
pub use health_sink_port::{FanoutSink, HealthSink, NoOpHealthSink};
pub use store_port::{
    BatchReport, InsertOutcome, OrderedStore, RecentWindow, ScoredRecord, StoreConnector,
    StoreError, encode_members,
};
