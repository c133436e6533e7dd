//! The capability table every extension module exposes.
//!
//! `query_supported_formats` and `handle_frame` are required; `init` and
//! `uninit` are optional. `S` is the extension's own state, created by
//! `init` (or `S::default()` when there is no `init`) and handed back on
//! every call.

use super::host::HostContext;
use crate::frame::{FrameDescriptor, PixelFormat};
use futures::future::BoxFuture;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Handled,
    Skipped,
    Failed,
}

impl FrameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameStatus::Handled => "handled",
            FrameStatus::Skipped => "skipped",
            FrameStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type InitFn<S> = fn(&HostContext) -> Result<S, String>;
pub type UninitFn<S> = fn(&HostContext, S);
pub type QueryFormatsFn<S> = fn(&HostContext, &S) -> Vec<PixelFormat>;
pub type HandleFrameFn<S> =
    for<'a> fn(&'a HostContext, &'a mut S, FrameDescriptor<'a>) -> BoxFuture<'a, FrameStatus>;

pub struct CapabilityTable<S> {
    pub init: Option<InitFn<S>>,
    pub uninit: Option<UninitFn<S>>,
    pub query_supported_formats: Option<QueryFormatsFn<S>>,
    pub handle_frame: Option<HandleFrameFn<S>>,
}

impl<S> CapabilityTable<S> {
    pub fn empty() -> Self {
        Self {
            init: None,
            uninit: None,
            query_supported_formats: None,
            handle_frame: None,
        }
    }
}
