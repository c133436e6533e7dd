mod abi;
mod host;
mod loader;

pub mod analyzer_client;
pub mod frame_logger;

pub use abi::{CapabilityTable, FrameStatus, HandleFrameFn, InitFn, QueryFormatsFn, UninitFn};
pub use host::HostContext;
pub use loader::{ExtensionDescriptor, ExtensionError, ExtensionRegistry, LoadedExtension};

#[cfg(test)]
pub(crate) use host::test_context;
