//! The CLI's plugin manager: serves `file:` URLs from a base directory and
//! prints everything else a module asks of the browser.
use std::path::{Path, PathBuf};

use log::{debug, info};
use npbridge_core::abi::types::{NPReason, NPRect};
use npbridge_core::host::RegionHandle;
use npbridge_core::kernel::constants::FILE_URL_SCHEME;
use npbridge_core::plugin_system::instance::SessionId;
use npbridge_core::plugin_system::{PostData, StreamSink, UrlRequest};
use npbridge_core::{HostServiceError, PluginManagerService};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A request accepted from a module, waiting to be served by the run loop.
#[derive(Debug)]
pub enum HostRequest {
    Fetch { request: UrlRequest, path: PathBuf },
    Post { request: UrlRequest, data: PostData },
}

/// Plugin manager handed to the core by the CLI.
#[derive(Debug)]
pub struct FileHost {
    base: PathBuf,
    requests: UnboundedSender<HostRequest>,
}

impl FileHost {
    pub fn new(base: impl Into<PathBuf>) -> (Self, UnboundedReceiver<HostRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (
            Self {
                base: base.into(),
                requests,
            },
            receiver,
        )
    }

    fn queue(&self, request: HostRequest) -> Result<(), HostServiceError> {
        self.requests
            .send(request)
            .map_err(|_| HostServiceError::Refused("host is shutting down".to_string()))
    }
}

/// Resolve `url` to a file under `base`.
///
/// Accepts `file:///abs`, `file:rel` and bare relative paths. Any other scheme
/// is an invalid URL for this host.
pub fn resolve_file_url(base: &Path, url: &str) -> Result<PathBuf, HostServiceError> {
    let path = match url.strip_prefix(FILE_URL_SCHEME) {
        Some(rest) => rest.strip_prefix("//").unwrap_or(rest),
        None if has_scheme(url) => return Err(HostServiceError::InvalidUrl(url.to_string())),
        None => url,
    };
    if path.is_empty() {
        return Err(HostServiceError::InvalidUrl(url.to_string()));
    }
    let path = Path::new(path);
    Ok(if path.is_absolute() { path.to_path_buf() } else { base.join(path) })
}

fn has_scheme(url: &str) -> bool {
    match url.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// MIME type announced for a served file.
pub fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") => "text/plain",
        Some("htm" | "html") => "text/html",
        Some("png") => "image/png",
        Some("hello") => "application/x-hello",
        _ => "application/octet-stream",
    }
}

impl PluginManagerService for FileHost {
    fn get_url(&self, request: UrlRequest) -> Result<(), HostServiceError> {
        let path = resolve_file_url(&self.base, request.url())?;
        debug!("Queued fetch of {} for session {}", path.display(), request.session());
        self.queue(HostRequest::Fetch { request, path })
    }

    fn post_url(&self, request: UrlRequest, data: PostData) -> Result<(), HostServiceError> {
        self.queue(HostRequest::Post { request, data })
    }

    fn new_stream(
        &self,
        session: SessionId,
        mime_type: &str,
        target: &str,
    ) -> Result<Box<dyn StreamSink>, HostServiceError> {
        println!("[stream] session {} opened {} for '{}'", session, mime_type, target);
        Ok(Box::new(PrintSink {
            session,
            target: target.to_string(),
            written: 0,
        }))
    }

    fn status(&self, session: SessionId, message: &str) {
        println!("[status] session {}: {}", session, message);
    }

    fn invalidate_rect(&self, session: SessionId, rect: NPRect) {
        debug!("Session {} invalidated {:?}", session, rect);
    }

    fn invalidate_region(&self, session: SessionId, _region: RegionHandle) {
        debug!("Session {} invalidated a region", session);
    }

    fn force_redraw(&self, session: SessionId) {
        debug!("Session {} forced a redraw", session);
    }

    fn reload_plugins(&self, reload_pages: bool) {
        info!("Module asked for a plugin reload (pages: {})", reload_pages);
    }
}

/// Counts what a module writes to a stream it created and prints a summary.
struct PrintSink {
    session: SessionId,
    target: String,
    written: u64,
}

impl StreamSink for PrintSink {
    fn write(&mut self, data: &[u8]) -> Result<usize, HostServiceError> {
        self.written += data.len() as u64;
        Ok(data.len())
    }

    fn close(&mut self, reason: NPReason) {
        println!(
            "[stream] session {} wrote {} bytes to '{}' ({:?})",
            self.session, self.written, self.target, reason
        );
    }
}
