//! Adapters module - external collaborators behind trait seams

pub mod traits;
pub mod mock;
pub mod s3;
pub mod centrifugo;
pub mod bus;

pub use traits::{AuditBus, ObjectStorage, PushChannel};
pub use mock::{MemoryObjectStorage, RecordingBus, RecordingChannel};
pub use s3::S3ObjectStorage;
pub use centrifugo::CentrifugoChannel;
pub use bus::HttpAuditBus;
