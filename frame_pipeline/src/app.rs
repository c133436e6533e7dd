use crate::{
    config::{Config, FrameConfig},
    extension::{ExtensionRegistry, FrameStatus, HostContext, LoadedExtension},
    frame::FrameDescriptor,
    source::RawFrameSource,
    telemetry::Metrics,
    token::Token,
};
use std::{error::Error, future::Future, io, sync::Arc};
use tokio::{io::AsyncRead, signal};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub handled: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl RunSummary {
    fn count(&mut self, status: FrameStatus) {
        self.frames += 1;
        match status {
            FrameStatus::Handled => self.handled += 1,
            FrameStatus::Skipped => self.skipped += 1,
            FrameStatus::Failed => self.failed += 1,
        }
    }
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let token = Token::resolve(config.instance.token.as_deref())?;
    let metrics = Arc::new(Metrics::new()?);
    let host = HostContext::from_config(&config, token, metrics.clone());

    let registry = ExtensionRegistry::with_builtins();
    let mut extension = match registry
        .load(&config.extension.module)
        .and_then(|descriptor| descriptor.initialize(host))
    {
        Ok(extension) => extension,
        Err(e) => {
            tracing::error!(
                "Failed to load extension {:?} (available: {:?}): {}",
                config.extension.module,
                registry.module_names(),
                e
            );
            return Err(Box::new(e));
        }
    };
    extension.negotiate(config.frame.pixel_format)?;

    let frame_len = config.frame.frame_len().ok_or_else(|| {
        format!(
            "A {}x{} {} frame is too large",
            config.frame.width, config.frame.height, config.frame.pixel_format
        )
    })?;
    let source = RawFrameSource::new(tokio::io::stdin(), frame_len);
    let outcome = run_frames(&mut extension, source, &config.frame, shutdown_signal()).await;
    extension.teardown();

    match metrics.render() {
        Ok(rendered) => tracing::info!(metrics = %rendered, "Final metrics"),
        Err(e) => tracing::warn!("Failed to render metrics: {}", e),
    }

    let summary = outcome?;
    tracing::info!(
        "Processed {} frames: {} handled, {} skipped, {} failed",
        summary.frames,
        summary.handled,
        summary.skipped,
        summary.failed
    );
    Ok(())
}

/// Feeds frames from `source` to the extension until the source ends or
/// `shutdown` resolves. Shutdown is only observed between frames.
pub async fn run_frames<R: AsyncRead + Unpin>(
    extension: &mut LoadedExtension,
    mut source: RawFrameSource<R>,
    frame: &FrameConfig,
    shutdown: impl Future<Output = ()>,
) -> io::Result<RunSummary> {
    tokio::pin!(shutdown);
    let mut summary = RunSummary::default();

    loop {
        let data = tokio::select! {
            next = source.next_frame() => match next {
                Ok(Some(data)) => data,
                Ok(None) => {
                    tracing::info!("Frame source exhausted");
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::error!("Discarding partial trailing frame: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            },
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, stopping frame loop");
                break;
            }
        };

        let descriptor = FrameDescriptor::new(frame.width, frame.height, frame.pixel_format, data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let status = extension.dispatch_frame(descriptor).await;
        tracing::debug!("Frame {} {}", summary.frames + 1, status);
        summary.count(status);
    }

    Ok(summary)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
