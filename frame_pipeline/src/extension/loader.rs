use super::{
    abi::{CapabilityTable, FrameStatus, HandleFrameFn, InitFn, QueryFormatsFn, UninitFn},
    analyzer_client, frame_logger,
    host::HostContext,
};
use crate::frame::{FrameDescriptor, PixelFormat};
use futures::future::BoxFuture;
use std::{collections::HashMap, fmt, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("No extension module named {0:?}")]
    NotFound(String),
    #[error("Extension {module} does not provide required symbol {symbol}")]
    MissingSymbol {
        module: String,
        symbol: &'static str,
    },
    #[error("Extension {module} failed to initialise: {reason}")]
    InitFailed { module: String, reason: String },
    #[error("Extension {module} does not accept {format} frames")]
    FormatRejected { module: String, format: PixelFormat },
}

trait ModuleTable: Send + Sync {
    fn resolve(&self, module: &str) -> Result<Box<dyn ResolvedModule>, ExtensionError>;
}

trait ResolvedModule: Send {
    fn initialize(
        self: Box<Self>,
        module: &str,
        host: &HostContext,
    ) -> Result<Box<dyn ActiveModule>, ExtensionError>;
}

trait ActiveModule: Send {
    fn supported_formats(&self, host: &HostContext) -> Vec<PixelFormat>;
    fn handle_frame<'a>(
        &'a mut self,
        host: &'a HostContext,
        frame: FrameDescriptor<'a>,
    ) -> BoxFuture<'a, FrameStatus>;
    fn uninit(self: Box<Self>, host: &HostContext);
}

struct TableConstructor<S> {
    build: fn() -> CapabilityTable<S>,
}

impl<S: Default + Send + 'static> ModuleTable for TableConstructor<S> {
    fn resolve(&self, module: &str) -> Result<Box<dyn ResolvedModule>, ExtensionError> {
        let table = (self.build)();
        let missing = |symbol| ExtensionError::MissingSymbol {
            module: module.to_string(),
            symbol,
        };
        let query = table
            .query_supported_formats
            .ok_or_else(|| missing("query_supported_formats"))?;
        let handle = table.handle_frame.ok_or_else(|| missing("handle_frame"))?;

        Ok(Box::new(Resolved {
            init: table.init,
            uninit: table.uninit,
            query,
            handle,
        }))
    }
}

struct Resolved<S> {
    init: Option<InitFn<S>>,
    uninit: Option<UninitFn<S>>,
    query: QueryFormatsFn<S>,
    handle: HandleFrameFn<S>,
}

impl<S: Default + Send + 'static> ResolvedModule for Resolved<S> {
    fn initialize(
        self: Box<Self>,
        module: &str,
        host: &HostContext,
    ) -> Result<Box<dyn ActiveModule>, ExtensionError> {
        let state = match self.init {
            Some(init) => init(host).map_err(|reason| ExtensionError::InitFailed {
                module: module.to_string(),
                reason,
            })?,
            None => S::default(),
        };

        Ok(Box::new(Active {
            state,
            uninit: self.uninit,
            query: self.query,
            handle: self.handle,
        }))
    }
}

struct Active<S> {
    state: S,
    uninit: Option<UninitFn<S>>,
    query: QueryFormatsFn<S>,
    handle: HandleFrameFn<S>,
}

impl<S: Send + 'static> ActiveModule for Active<S> {
    fn supported_formats(&self, host: &HostContext) -> Vec<PixelFormat> {
        (self.query)(host, &self.state)
    }

    fn handle_frame<'a>(
        &'a mut self,
        host: &'a HostContext,
        frame: FrameDescriptor<'a>,
    ) -> BoxFuture<'a, FrameStatus> {
        (self.handle)(host, &mut self.state, frame)
    }

    fn uninit(self: Box<Self>, host: &HostContext) {
        let Active { state, uninit, .. } = *self;
        if let Some(uninit) = uninit {
            uninit(host, state);
        }
    }
}

/// Compile-time table of extension modules, looked up by name.
pub struct ExtensionRegistry {
    modules: HashMap<String, Box<dyn ModuleTable>>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(analyzer_client::MODULE_NAME, analyzer_client::capabilities);
        registry.register(frame_logger::MODULE_NAME, frame_logger::capabilities);
        registry
    }

    pub fn register<S: Default + Send + 'static>(
        &mut self,
        name: &str,
        build: fn() -> CapabilityTable<S>,
    ) {
        self.modules
            .insert(name.to_string(), Box::new(TableConstructor { build }));
    }

    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves `path` to a registered module. A filesystem-style path such as
    /// `/opt/ext/libframe-logger.so` is matched by its file stem.
    pub fn load(&self, path: &str) -> Result<ExtensionDescriptor, ExtensionError> {
        let (module, table) = self
            .lookup(path)
            .ok_or_else(|| ExtensionError::NotFound(path.to_string()))?;
        let resolved = table.resolve(module)?;
        tracing::debug!("Resolved extension {} from {:?}", module, path);

        Ok(ExtensionDescriptor {
            module: module.to_string(),
            resolved,
        })
    }

    fn lookup(&self, path: &str) -> Option<(&str, &dyn ModuleTable)> {
        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path);
        [path, stem, stem.strip_prefix("lib").unwrap_or(stem)]
            .into_iter()
            .find_map(|candidate| self.modules.get_key_value(candidate))
            .map(|(name, table)| (name.as_str(), table.as_ref()))
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("modules", &self.module_names())
            .finish()
    }
}

/// A module whose required capabilities are present but that has not run
/// any code yet.
pub struct ExtensionDescriptor {
    module: String,
    resolved: Box<dyn ResolvedModule>,
}

impl ExtensionDescriptor {
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Runs the module's `init`. The descriptor is consumed either way.
    pub fn initialize(self, host: HostContext) -> Result<LoadedExtension, ExtensionError> {
        let active = self.resolved.initialize(&self.module, &host)?;
        tracing::info!("Extension {} initialised for {}", self.module, host.token);

        Ok(LoadedExtension {
            module: self.module,
            host,
            active: Some(active),
        })
    }
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// An initialised extension. `uninit` runs exactly once: on `teardown`, or
/// on drop if `teardown` was never called.
pub struct LoadedExtension {
    module: String,
    host: HostContext,
    active: Option<Box<dyn ActiveModule>>,
}

impl LoadedExtension {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn supported_formats(&self) -> Vec<PixelFormat> {
        self.active
            .as_ref()
            .map(|active| active.supported_formats(&self.host))
            .unwrap_or_default()
    }

    pub fn negotiate(&self, format: PixelFormat) -> Result<(), ExtensionError> {
        if self.supported_formats().contains(&format) {
            Ok(())
        } else {
            Err(ExtensionError::FormatRejected {
                module: self.module.clone(),
                format,
            })
        }
    }

    pub async fn dispatch_frame(&mut self, frame: FrameDescriptor<'_>) -> FrameStatus {
        let status = match self.active.as_mut() {
            Some(active) => active.handle_frame(&self.host, frame).await,
            None => FrameStatus::Failed,
        };
        self.host.metrics.record_dispatch(status.as_str());
        status
    }

    pub fn teardown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(active) = self.active.take() {
            active.uninit(&self.host);
            tracing::info!("Extension {} torn down", self.module);
        }
    }
}

impl Drop for LoadedExtension {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("module", &self.module)
            .field("active", &self.active.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::host::test_context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        frames: usize,
    }

    fn query_all(_: &HostContext, _: &Counting) -> Vec<PixelFormat> {
        vec![PixelFormat::Bgr24]
    }

    fn count_frame<'a>(
        _: &'a HostContext,
        state: &'a mut Counting,
        _: FrameDescriptor<'a>,
    ) -> BoxFuture<'a, FrameStatus> {
        Box::pin(async move {
            state.frames += 1;
            FrameStatus::Handled
        })
    }

    static INIT_WITHOUT_HANDLER: AtomicUsize = AtomicUsize::new(0);

    fn counting_init(_: &HostContext) -> Result<Counting, String> {
        INIT_WITHOUT_HANDLER.fetch_add(1, Ordering::SeqCst);
        Ok(Counting::default())
    }

    fn without_handler() -> CapabilityTable<Counting> {
        CapabilityTable {
            init: Some(counting_init),
            query_supported_formats: Some(query_all),
            ..CapabilityTable::empty()
        }
    }

    fn refusing_init(_: &HostContext) -> Result<Counting, String> {
        Err("model file missing".to_string())
    }

    fn with_failing_init() -> CapabilityTable<Counting> {
        CapabilityTable {
            init: Some(refusing_init),
            query_supported_formats: Some(query_all),
            handle_frame: Some(count_frame),
            ..CapabilityTable::empty()
        }
    }

    fn without_init() -> CapabilityTable<Counting> {
        CapabilityTable {
            query_supported_formats: Some(query_all),
            handle_frame: Some(count_frame),
            ..CapabilityTable::empty()
        }
    }

    static UNINIT_CALLS: AtomicUsize = AtomicUsize::new(0);
    static FRAMES_AT_UNINIT: AtomicUsize = AtomicUsize::new(0);

    fn counting_uninit(_: &HostContext, state: Counting) {
        UNINIT_CALLS.fetch_add(1, Ordering::SeqCst);
        FRAMES_AT_UNINIT.store(state.frames, Ordering::SeqCst);
    }

    fn with_uninit() -> CapabilityTable<Counting> {
        CapabilityTable {
            uninit: Some(counting_uninit),
            query_supported_formats: Some(query_all),
            handle_frame: Some(count_frame),
            ..CapabilityTable::empty()
        }
    }

    static DROP_UNINIT_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn drop_counting_uninit(_: &HostContext, _: Counting) {
        DROP_UNINIT_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    fn with_drop_uninit() -> CapabilityTable<Counting> {
        CapabilityTable {
            uninit: Some(drop_counting_uninit),
            query_supported_formats: Some(query_all),
            handle_frame: Some(count_frame),
            ..CapabilityTable::empty()
        }
    }

    fn registry() -> ExtensionRegistry {
        let mut registry = ExtensionRegistry::new();
        registry.register("no-handler", without_handler);
        registry.register("failing-init", with_failing_init);
        registry.register("no-init", without_init);
        registry.register("with-uninit", with_uninit);
        registry.register("drop-uninit", with_drop_uninit);
        registry
    }

    fn frame(data: &[u8]) -> FrameDescriptor<'_> {
        FrameDescriptor::new(2, 2, PixelFormat::Bgr24, data).unwrap()
    }

    #[test]
    fn test_missing_handler_rejected_before_init() {
        let err = registry().load("no-handler").unwrap_err();

        assert!(matches!(
            err,
            ExtensionError::MissingSymbol {
                symbol: "handle_frame",
                ..
            }
        ));
        assert_eq!(INIT_WITHOUT_HANDLER.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_module_not_found() {
        let err = registry().load("does-not-exist").unwrap_err();
        assert!(matches!(err, ExtensionError::NotFound(name) if name == "does-not-exist"));
    }

    #[test]
    fn test_path_resolves_by_file_stem() {
        let descriptor = registry().load("/opt/extensions/libno-init.so").unwrap();
        assert_eq!(descriptor.module(), "no-init");
    }

    #[test]
    fn test_failing_init_reported() {
        let descriptor = registry().load("failing-init").unwrap();
        let err = descriptor.initialize(test_context()).unwrap_err();

        match err {
            ExtensionError::InitFailed { module, reason } => {
                assert_eq!(module, "failing-init");
                assert_eq!(reason, "model file missing");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_absent_init_starts_from_default_state() {
        let mut extension = registry()
            .load("no-init")
            .unwrap()
            .initialize(test_context())
            .unwrap();
        let data = [0u8; 12];

        assert_eq!(extension.dispatch_frame(frame(&data)).await, FrameStatus::Handled);
        assert_eq!(extension.supported_formats(), vec![PixelFormat::Bgr24]);
    }

    #[tokio::test]
    async fn test_teardown_runs_uninit_once_with_final_state() {
        let mut extension = registry()
            .load("with-uninit")
            .unwrap()
            .initialize(test_context())
            .unwrap();
        let data = [0u8; 12];
        extension.dispatch_frame(frame(&data)).await;
        extension.dispatch_frame(frame(&data)).await;

        extension.teardown();

        assert_eq!(UNINIT_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(FRAMES_AT_UNINIT.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_tears_down() {
        let extension = registry()
            .load("drop-uninit")
            .unwrap()
            .initialize(test_context())
            .unwrap();
        drop(extension);

        assert_eq!(DROP_UNINIT_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let extension = registry()
            .load("no-init")
            .unwrap()
            .initialize(test_context())
            .unwrap();

        assert!(extension.negotiate(PixelFormat::Bgr24).is_ok());
        assert!(matches!(
            extension.negotiate(PixelFormat::Gray8),
            Err(ExtensionError::FormatRejected {
                format: PixelFormat::Gray8,
                ..
            })
        ));
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ExtensionRegistry::with_builtins();
        assert_eq!(registry.module_names(), vec!["analyzer-client", "frame-logger"]);
    }
}
