//! Host services shared by every test in this crate.
//!
//! Only the first services bundle installed in a process takes effect, so all
//! tests install the same one. Its plugin manager records into thread-local
//! state, keeping tests that run in parallel apart.
use std::cell::RefCell;
use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use crate::abi::types::{NPNVariable, NPReason, NPRect};
use crate::callbacks::SharedServices;
use crate::config::BridgeConfig;
use crate::host::{BrowserServices, HostServiceError, PluginManagerService, RegionHandle};
use crate::plugin_system::adapter::LegacyPlugin;
use crate::plugin_system::instance::{InstanceConfig, SessionId, SessionInstance};
use crate::plugin_system::notify::{PostData, UrlRequest};
use crate::plugin_system::stream::{ByteRange, StreamInfo, StreamSink};
use crate::plugin_system::tests::fake_module::{self, Script};
use crate::plugin_system::traits::{InterfaceId, PluginFactory};
use crate::utils::SendPtr;

pub const TEST_USER_AGENT: &str = "npbridge-test/1.0";
pub const TEST_DISPLAY: usize = 0x5157;

#[derive(Debug, Default)]
pub struct SinkRecord {
    pub mime_type: String,
    pub target: String,
    pub data: Vec<u8>,
    pub closed: Vec<NPReason>,
}

struct RecordingSink(Arc<Mutex<SinkRecord>>);

impl StreamSink for RecordingSink {
    fn write(&mut self, data: &[u8]) -> Result<usize, HostServiceError> {
        let mut record = self.0.lock().unwrap();
        record.data.extend_from_slice(data);
        Ok(data.len())
    }

    fn close(&mut self, reason: NPReason) {
        self.0.lock().unwrap().closed.push(reason);
    }
}

#[derive(Default)]
pub struct HostLog {
    /// Refuse every URL request with this error (after completing it, when
    /// `complete_inline` is also set).
    pub refuse: Option<fn() -> HostServiceError>,
    /// Complete requests before returning from the host call. URLs starting
    /// with `panic-after:` panic once completed.
    pub complete_inline: Option<NPReason>,
    /// Drop accepted requests before returning from the host call.
    pub drop_inline: bool,
    pub requests: Vec<UrlRequest>,
    pub posts: Vec<(String, PostData)>,
    pub sinks: Vec<Arc<Mutex<SinkRecord>>>,
    pub reads: Vec<(StreamInfo, Vec<ByteRange>)>,
    pub statuses: Vec<(SessionId, String)>,
    pub invalidated: Vec<NPRect>,
    pub regions: usize,
    pub redraws: usize,
    pub reloads: Vec<bool>,
}

thread_local! {
    static HOST_LOG: RefCell<HostLog> = RefCell::new(HostLog::default());
}

pub fn with_host<R>(f: impl FnOnce(&mut HostLog) -> R) -> R {
    HOST_LOG.with(|log| f(&mut log.borrow_mut()))
}

/// Take the requests recorded so far on this thread.
pub fn take_requests() -> Vec<UrlRequest> {
    with_host(|log| std::mem::take(&mut log.requests))
}

pub struct RecordingManager;

impl RecordingManager {
    fn accept(&self, request: UrlRequest) -> Result<(), HostServiceError> {
        if request.url().starts_with("panic:") {
            panic!("host service exploded");
        }
        let (refuse, complete, drop_inline) =
            with_host(|log| (log.refuse, log.complete_inline, log.drop_inline));
        if let Some(reason) = complete {
            let panics = request.url().starts_with("panic-after:");
            request.into_responder().complete(reason);
            if panics {
                panic!("host service exploded after completing");
            }
            return refuse.map_or(Ok(()), |refuse| Err(refuse()));
        }
        if let Some(refuse) = refuse {
            return Err(refuse());
        }
        if drop_inline {
            drop(request);
            return Ok(());
        }
        with_host(|log| log.requests.push(request));
        Ok(())
    }
}

impl PluginManagerService for RecordingManager {
    fn get_url(&self, request: UrlRequest) -> Result<(), HostServiceError> {
        self.accept(request)
    }

    fn post_url(&self, request: UrlRequest, data: PostData) -> Result<(), HostServiceError> {
        with_host(|log| log.posts.push((request.url().to_string(), data)));
        self.accept(request)
    }

    fn new_stream(
        &self,
        _session: SessionId,
        mime_type: &str,
        target: &str,
    ) -> Result<Box<dyn StreamSink>, HostServiceError> {
        if target == "_refused" {
            return Err(HostServiceError::Refused(target.to_string()));
        }
        let record = Arc::new(Mutex::new(SinkRecord {
            mime_type: mime_type.to_string(),
            target: target.to_string(),
            ..Default::default()
        }));
        with_host(|log| log.sinks.push(record.clone()));
        Ok(Box::new(RecordingSink(record)))
    }

    fn request_read(&self, stream: &StreamInfo, ranges: &[ByteRange]) -> Result<(), HostServiceError> {
        with_host(|log| log.reads.push((stream.clone(), ranges.to_vec())));
        Ok(())
    }

    fn status(&self, session: SessionId, message: &str) {
        with_host(|log| log.statuses.push((session, message.to_string())));
    }

    fn invalidate_rect(&self, _session: SessionId, rect: NPRect) {
        with_host(|log| log.invalidated.push(rect));
    }

    fn invalidate_region(&self, _session: SessionId, _region: RegionHandle) {
        with_host(|log| log.regions += 1);
    }

    fn force_redraw(&self, _session: SessionId) {
        with_host(|log| log.redraws += 1);
    }

    fn reload_plugins(&self, reload_pages: bool) {
        with_host(|log| log.reloads.push(reload_pages));
    }

    fn platform_handle(&self, _session: SessionId, variable: NPNVariable) -> Option<SendPtr<c_void>> {
        (variable == NPNVariable::X_DISPLAY).then_some(SendPtr(TEST_DISPLAY as *mut c_void))
    }
}

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        user_agent: TEST_USER_AGENT.to_string(),
        max_write_chunk: 4,
        write_ready_retries: 3,
        javascript_enabled: true,
        ..BridgeConfig::default()
    }
}

/// The one bundle every test uses.
pub fn services() -> BrowserServices {
    BrowserServices::new(Arc::new(RecordingManager)).with_config(test_config())
}

pub fn install() -> &'static SharedServices {
    SharedServices::install(&services()).expect("test services install")
}

/// Fresh thread state plus a fake module brought up with `script`.
pub fn load(script: Script) -> LegacyPlugin {
    fake_module::reset(script);
    with_host(|log| *log = HostLog::default());
    LegacyPlugin::create_plugin(fake_module::library("fake"), &services()).expect("fake module loads")
}

/// A started session of `plugin`.
pub fn started(plugin: &LegacyPlugin) -> SessionInstance {
    let session = plugin
        .create_instance(&InterfaceId::PLUGIN_INSTANCE)
        .expect("session created");
    session
        .start(InstanceConfig::new("application/x-fake").attribute("src", "movie.fake"))
        .expect("session started");
    session
}
