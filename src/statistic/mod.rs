//! Connection registry, byte-accounting stream wrapper, and the server's event bus
//! (spec.md §4.7, §4.9).

pub mod counting;
pub mod events;
pub mod registry;

pub use counting::CountingStream;
pub use events::{Event, EventBus, EventReceiver};
pub use registry::{ConnectionId, ConnectionRecord, ConnectionRegistry, ConnectionStats, Counters};
