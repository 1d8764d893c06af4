//! vcable Core Library
//!
//! Shared-buffer synchronization for virtual audio cables: the cell-based
//! region allocator, the per-endpoint register file and its generation
//! protocol, cross-process notification delivery, and the lock-free tick
//! engine that moves samples between rings and per-channel buffers.

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod host;
pub mod layout;
pub mod notify;
pub mod registry;
pub mod session;
pub mod shm;
pub mod state;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, EndpointConfig, EngineConfig};
pub use endpoint::{EndpointDescriptor, ProcessAttachment, RingInfo};
pub use engine::{NoopObserver, SkipReason, TickEngine, TickObserver, TickSummary};
pub use error::{
    CableError, CableResult, HardValidationError, HostError, ResourceError, SharedMemoryError,
    StateTransitionError,
};
pub use host::{CreationCompletion, DeviceRegistration, HostSurface, LoopbackHost};
pub use layout::BufferLayout;
pub use notify::{Notification, NotificationData, NotificationQueue, SignalHandle};
pub use registry::{DriverRegistry, EndpointRef};
pub use session::{PendingEndpoint, RegionInfo, Session, SessionOptions};
pub use state::{EndpointState, EndpointStateMachine};
pub use stats::{EndpointStatus, SessionStats};
pub use types::{
    ChannelCount, Direction, EndpointIndex, EndpointName, NotificationCount, ProcessId, SampleDepth,
    SampleRate, SessionId,
};
