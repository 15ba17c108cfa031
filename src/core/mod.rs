pub mod context;
pub mod events;
pub mod retry;
pub mod runtime;
pub mod segment;
pub mod variable_pool;

pub use context::ExecutionContext;
pub use events::{create_event_channel, EngineEvent, EventEmitter, EventReceiver};
pub use retry::backoff_delay;
pub use runtime::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
pub use segment::Segment;
pub use variable_pool::VariablePool;
