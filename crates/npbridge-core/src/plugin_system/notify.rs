//! URL requests made by a module and the notifications they owe it.
//!
//! `NPN_GetURLNotify`/`NPN_PostURLNotify` promise the module exactly one
//! `NPP_URLNotify` per accepted request. A request reaches the host as a
//! [`UrlRequest`]; the host answers through its [`UrlResponder`], delivering
//! content and then completing it with a reason. A responder that is dropped
//! without being completed reports `NPRES_NETWORK_ERR`; a session that is
//! destroyed first reports `NPRES_USER_BREAK` for everything still pending.
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::path::PathBuf;
use std::sync::Arc;

use crate::abi::types::NPReason;
use crate::plugin_system::error::StreamError;
use crate::plugin_system::instance::{InstancePeer, SessionId};
use crate::plugin_system::stream::{DeliveryOutcome, IncomingStream, StreamDelivery, StreamId, StreamInfo};
use crate::utils::ffi::lossy_cstring;
use crate::utils::{lock, SendPtr};

/// Opaque value a module attached to a notifying request. Handed back
/// unchanged in `NPP_URLNotify` and in `NPStream::notifyData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyToken(SendPtr<c_void>);

impl NotifyToken {
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(SendPtr(ptr))
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.0
    }
}

/// Body of a post request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostData {
    Buffer(Vec<u8>),
    /// The module asked for the contents of this file to be posted.
    File(PathBuf),
}

impl PostData {
    /// Build from the `(len, buf, file)` triple of `NPN_PostURL`.
    ///
    /// # Safety
    /// `buf` must be null or valid for `len` bytes.
    pub(crate) unsafe fn from_raw(len: u32, buf: *const u8, file: bool) -> Option<Self> {
        if buf.is_null() {
            return (len == 0 && !file).then(|| PostData::Buffer(Vec::new()));
        }
        let bytes = unsafe { std::slice::from_raw_parts(buf, len as usize) };
        if file {
            let path = std::str::from_utf8(bytes).ok()?.trim_end_matches('\0');
            let path = path.strip_prefix("file://").unwrap_or(path);
            Some(PostData::File(PathBuf::from(path)))
        } else {
            Some(PostData::Buffer(bytes.to_vec()))
        }
    }
}

pub(crate) struct PendingNotify {
    pub(crate) url: CString,
    pub(crate) token: NotifyToken,
    armed: bool,
    orphaned: bool,
}

pub(crate) enum ArmOutcome {
    Armed,
    /// Completed before the host call returned; nothing left to do.
    AlreadyCompleted,
    /// The responder was dropped before the host call returned.
    Orphaned(PendingNotify),
}

/// Notifications a session still owes its module.
#[derive(Default)]
pub(crate) struct PendingNotifications {
    next_key: u64,
    entries: HashMap<u64, PendingNotify>,
}

impl PendingNotifications {
    /// Track a request before it is handed to the host. It stays unarmed
    /// until the host has accepted it.
    pub(crate) fn register(&mut self, url: &str, token: NotifyToken) -> u64 {
        self.next_key += 1;
        self.entries.insert(
            self.next_key,
            PendingNotify {
                url: lossy_cstring(url),
                token,
                armed: false,
                orphaned: false,
            },
        );
        self.next_key
    }

    pub(crate) fn arm(&mut self, key: u64) -> ArmOutcome {
        match self.entries.get_mut(&key) {
            None => ArmOutcome::AlreadyCompleted,
            Some(entry) if entry.orphaned => match self.entries.remove(&key) {
                Some(entry) => ArmOutcome::Orphaned(entry),
                None => ArmOutcome::AlreadyCompleted,
            },
            Some(entry) => {
                entry.armed = true;
                ArmOutcome::Armed
            }
        }
    }

    /// Forget a request the host refused; the module learns about it from
    /// the returned status instead. Returns false when the host completed
    /// the request before refusing it, so the notification already went out.
    pub(crate) fn cancel(&mut self, key: u64) -> bool {
        self.entries.remove(&key).is_some()
    }

    pub(crate) fn take(&mut self, key: u64) -> Option<PendingNotify> {
        self.entries.remove(&key)
    }

    /// The responder went away without completing. Returns the entry if the
    /// notification is due now.
    pub(crate) fn abandon(&mut self, key: u64) -> Option<PendingNotify> {
        let entry = self.entries.get_mut(&key)?;
        if entry.armed {
            self.entries.remove(&key)
        } else {
            entry.orphaned = true;
            None
        }
    }

    pub(crate) fn token(&self, key: u64) -> Option<NotifyToken> {
        self.entries.get(&key).map(|e| e.token)
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingNotify> {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| self.entries.remove(&k)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A module's request to fetch or post a URL, as seen by the host.
pub struct UrlRequest {
    url: String,
    target: Option<String>,
    responder: UrlResponder,
}

impl UrlRequest {
    pub(crate) fn new(peer: Arc<InstancePeer>, url: String, target: Option<String>, notify_key: Option<u64>) -> Self {
        let responder = UrlResponder {
            peer,
            url: url.clone(),
            notify_key,
            finished: false,
        };
        Self { url, target, responder }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Window the content is meant for. `None` means the module itself.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn session(&self) -> SessionId {
        self.responder.session()
    }

    pub fn wants_notification(&self) -> bool {
        self.responder.wants_notification()
    }

    pub fn responder(&self) -> &UrlResponder {
        &self.responder
    }

    pub fn into_responder(self) -> UrlResponder {
        self.responder
    }
}

impl std::fmt::Debug for UrlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlRequest")
            .field("url", &self.url)
            .field("target", &self.target)
            .field("session", &self.session())
            .field("notify", &self.wants_notification())
            .finish()
    }
}

/// Answers one [`UrlRequest`]. Must be used on the module's call thread.
pub struct UrlResponder {
    peer: Arc<InstancePeer>,
    url: String,
    notify_key: Option<u64>,
    finished: bool,
}

impl UrlResponder {
    pub fn session(&self) -> SessionId {
        self.peer.session_id()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn wants_notification(&self) -> bool {
        self.notify_key.is_some()
    }

    /// The module's token, while the notification is still pending.
    pub fn notify_token(&self) -> Option<NotifyToken> {
        let key = self.notify_key?;
        lock(&self.peer.notifications).token(key)
    }

    /// Deliver `data` to the requesting session as a stream.
    pub fn deliver(&self, mime_type: &str, data: impl Into<Arc<[u8]>>) -> Result<DeliveryOutcome, StreamError> {
        self.deliver_stream(StreamDelivery::new(self.url.clone(), mime_type, data))
    }

    /// Deliver a prepared stream. The notify token is attached automatically.
    pub fn deliver_stream(&self, delivery: StreamDelivery) -> Result<DeliveryOutcome, StreamError> {
        if self.peer.is_destroyed() {
            return Err(StreamError::SessionInactive);
        }
        let delivery = delivery.with_notify(self.notify_token());
        self.peer.deliver_stream(delivery)
    }

    /// Announce content whose bytes arrive later. The notify token is
    /// attached automatically.
    pub fn begin_stream(&self, stream: IncomingStream) -> Result<StreamInfo, StreamError> {
        if self.peer.is_destroyed() {
            return Err(StreamError::SessionInactive);
        }
        self.peer.begin_stream(stream.with_notify(self.notify_token()))
    }

    /// Feed the next piece of a stream opened with [`begin_stream`](Self::begin_stream).
    pub fn write_stream(&self, id: StreamId, data: &[u8]) -> Result<bool, StreamError> {
        self.peer.push_stream(id, data, None)
    }

    /// Answer a range the module asked for with `NPN_RequestRead`.
    pub fn write_range(&self, id: StreamId, offset: u64, data: &[u8]) -> Result<bool, StreamError> {
        self.peer.push_stream(id, data, Some(offset))
    }

    pub fn end_stream(&self, id: StreamId, reason: NPReason) -> Result<(), StreamError> {
        self.peer.end_incoming(id, reason)
    }

    /// Finish the request, sending the pending notification (if any) with `reason`.
    pub fn complete(mut self, reason: NPReason) {
        self.finished = true;
        self.notify(reason, false);
    }

    fn notify(&self, reason: NPReason, abandoned: bool) {
        let Some(key) = self.notify_key else {
            return;
        };
        let due = {
            let mut pending = lock(&self.peer.notifications);
            if abandoned { pending.abandon(key) } else { pending.take(key) }
        };
        if let Some(entry) = due {
            self.peer.deliver_notify(entry, reason);
        }
    }
}

impl Drop for UrlResponder {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("Request for '{}' dropped without completion", self.url);
            self.notify(NPReason::NETWORK_ERR, true);
        }
    }
}

impl std::fmt::Debug for UrlResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlResponder")
            .field("url", &self.url)
            .field("session", &self.session())
            .field("notify", &self.wants_notification())
            .finish()
    }
}
