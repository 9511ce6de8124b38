mod codec;
mod in_memory;
mod log;
mod log_core;

pub use codec::CodecError;
pub use in_memory::InMemoryLogStore;
pub use log::LogMetadata;
pub use log::LogStore;
pub use log::LogStoreError;
pub use log::WriteOptions;
pub use log_core::LogCore;
