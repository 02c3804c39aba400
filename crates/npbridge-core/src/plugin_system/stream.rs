//! # Streams
//!
//! Every transfer between host and module is a stream with a native
//! [`NPStream`] record the module holds a pointer to. Streams run in two
//! directions:
//!
//! - **To the module**: content the host delivers (URL responses, full-page
//!   documents). The module is told about it through `NPP_NewStream` and
//!   consumes it with `NPP_WriteReady`/`NPP_Write`.
//! - **From the module**: streams the module opens with `NPN_NewStream` and
//!   fills with `NPN_Write`; the bytes go to a host [`StreamSink`].
//!
//! A [`StreamRegistry`] lives in each session and owns the native records.
//! Destroying a stream removes it from the registry, so the reason code is
//! reported exactly once no matter who ends it.
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_void, CString};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::abi::types::{NPReason, NPStream, NP_NORMAL};
use crate::host::HostServiceError;
use crate::plugin_system::error::StreamError;
use crate::plugin_system::instance::{InstancePeer, SessionId};
use crate::plugin_system::notify::NotifyToken;
use crate::utils::ffi::lossy_cstring;

/// How many destroyed streams a registry remembers for diagnostics.
const CLOSED_HISTORY: usize = 64;

/// Tag stored in every [`StreamPeer`] so pointers handed back by a module can
/// be told apart from foreign ones.
const STREAM_PEER_TAG: u32 = 0x4e50_5354;

/// Identifier of a stream within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Host-delivered content consumed by the module.
    ToModule,
    /// Module-produced content written to a host sink.
    FromModule,
}

/// A byte range requested with `NPN_RequestRead`. Negative offsets count
/// from the end of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: i64,
    pub length: u32,
}

impl ByteRange {
    pub fn new(offset: i64, length: u32) -> Self {
        Self { offset, length }
    }

    /// Absolute `(start, len)` of this range within `total` bytes, clipped to
    /// the end. `None` if the range starts outside the data.
    pub fn resolve(&self, total: u64) -> Option<(u64, u64)> {
        let start = if self.offset < 0 {
            total.checked_sub(self.offset.unsigned_abs())?
        } else {
            self.offset as u64
        };
        if start >= total {
            return None;
        }
        let len = (self.length as u64).min(total - start);
        Some((start, len))
    }
}

impl From<(i32, u32)> for ByteRange {
    fn from((offset, length): (i32, u32)) -> Self {
        Self::new(offset as i64, length)
    }
}

/// Destination of a module-created stream.
pub trait StreamSink: Send {
    /// Accept `data`; returns how many bytes were taken.
    fn write(&mut self, data: &[u8]) -> Result<usize, HostServiceError>;

    /// Called exactly once when the stream ends.
    fn close(&mut self, reason: NPReason);
}

/// Host-visible description of an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: StreamId,
    pub session: SessionId,
    pub direction: StreamDirection,
    pub url: String,
    pub mime_type: String,
    pub target: Option<String>,
    pub seekable: bool,
    /// Transfer mode the module chose in `NPP_NewStream`.
    pub mode: u16,
    /// Ranges most recently requested with `NPN_RequestRead`.
    pub requested_ranges: Vec<ByteRange>,
}

/// Content the host wants delivered to a module session.
#[derive(Clone)]
pub struct StreamDelivery {
    pub url: String,
    pub mime_type: String,
    pub data: Arc<[u8]>,
    /// Advertise the stream as seekable in `NPP_NewStream`.
    pub seekable: bool,
    pub last_modified: u32,
    pub(crate) notify: Option<NotifyToken>,
}

impl StreamDelivery {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            data: data.into(),
            seekable: false,
            last_modified: 0,
            notify: None,
        }
    }

    pub fn seekable(mut self, seekable: bool) -> Self {
        self.seekable = seekable;
        self
    }

    pub fn last_modified(mut self, last_modified: u32) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub(crate) fn with_notify(mut self, token: Option<NotifyToken>) -> Self {
        self.notify = token;
        self
    }
}

impl fmt::Debug for StreamDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDelivery")
            .field("url", &self.url)
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .field("seekable", &self.seekable)
            .finish()
    }
}

/// Host content announced to a module before its bytes are available. The
/// host then feeds it piece by piece, see
/// [`SessionInstance::begin_stream`](crate::plugin_system::SessionInstance::begin_stream).
#[derive(Debug, Clone, Default)]
pub struct IncomingStream {
    pub url: String,
    pub mime_type: String,
    /// Total length if known, zero otherwise.
    pub end: u32,
    pub seekable: bool,
    pub last_modified: u32,
    pub(crate) notify: Option<NotifyToken>,
}

impl IncomingStream {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            ..Default::default()
        }
    }

    pub fn with_length(mut self, end: u32) -> Self {
        self.end = end;
        self
    }

    pub fn seekable(mut self, seekable: bool) -> Self {
        self.seekable = seekable;
        self
    }

    pub fn last_modified(mut self, last_modified: u32) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub(crate) fn with_notify(mut self, token: Option<NotifyToken>) -> Self {
        self.notify = token;
        self
    }
}

/// Result of handing content to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The stream ran to completion (or was aborted) and has been destroyed
    /// with the given reason.
    Finished(NPReason),
    /// The module chose `NP_SEEK`; the stream stays open for range reads until
    /// the module or the session destroys it.
    AwaitingReads(StreamId),
}

/// Host data hung off `NPStream::ndata`.
pub(crate) struct StreamPeer {
    tag: u32,
    pub(crate) owner: *const InstancePeer,
    pub(crate) id: StreamId,
}

impl StreamPeer {
    /// Reads the host data of a module-supplied stream pointer.
    ///
    /// # Safety
    /// `stream` must be null or point to a readable `NPStream`.
    pub(crate) unsafe fn from_native<'a>(stream: *const NPStream) -> Option<&'a StreamPeer> {
        if stream.is_null() {
            return None;
        }
        let ndata = unsafe { (*stream).ndata } as *const StreamPeer;
        if ndata.is_null() {
            return None;
        }
        let peer = unsafe { &*ndata };
        (peer.tag == STREAM_PEER_TAG).then_some(peer)
    }
}

/// A freshly opened stream: its id and the record to hand to the module.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamHandle {
    pub(crate) id: StreamId,
    pub(crate) native: *mut NPStream,
}

/// What a partial-read request turned into.
pub(crate) enum ReadPlan {
    /// The core holds the data; write these `(offset, data, len)` pieces to the module.
    Serve(Vec<(u64, Arc<[u8]>, u64)>),
    /// The host has to satisfy it.
    Forward(StreamInfo),
}

/// One open stream. Dropping it frees the native record, so it must only be
/// dropped after the module has been told about its end.
pub(crate) struct StreamRecord {
    info: StreamInfo,
    native: Box<NPStream>,
    _peer: Box<StreamPeer>,
    _url: CString,
    data: Option<Arc<[u8]>>,
    sink: Option<Box<dyn StreamSink>>,
    spool: Option<NamedTempFile>,
    transferred: u64,
}

impl StreamRecord {
    pub(crate) fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub(crate) fn native_ptr(&mut self) -> *mut NPStream {
        &mut *self.native
    }
}

/// Parameters for opening a stream.
pub(crate) struct StreamSpec {
    pub direction: StreamDirection,
    pub url: String,
    pub mime_type: String,
    pub target: Option<String>,
    pub seekable: bool,
    pub end: u32,
    pub last_modified: u32,
    pub notify: Option<NotifyToken>,
    pub data: Option<Arc<[u8]>>,
    pub sink: Option<Box<dyn StreamSink>>,
}

impl StreamSpec {
    pub(crate) fn to_module(delivery: &StreamDelivery) -> Self {
        Self {
            direction: StreamDirection::ToModule,
            url: delivery.url.clone(),
            mime_type: delivery.mime_type.clone(),
            target: None,
            seekable: delivery.seekable,
            end: u32::try_from(delivery.data.len()).unwrap_or(u32::MAX),
            last_modified: delivery.last_modified,
            notify: delivery.notify,
            data: Some(delivery.data.clone()),
            sink: None,
        }
    }

    pub(crate) fn incoming(stream: &IncomingStream) -> Self {
        Self {
            direction: StreamDirection::ToModule,
            url: stream.url.clone(),
            mime_type: stream.mime_type.clone(),
            target: None,
            seekable: stream.seekable,
            end: stream.end,
            last_modified: stream.last_modified,
            notify: stream.notify,
            data: None,
            sink: None,
        }
    }

    pub(crate) fn from_module(mime_type: String, target: String, sink: Box<dyn StreamSink>) -> Self {
        Self {
            direction: StreamDirection::FromModule,
            url: String::new(),
            mime_type,
            target: Some(target),
            seekable: false,
            end: 0,
            last_modified: 0,
            notify: None,
            data: None,
            sink: Some(sink),
        }
    }
}

/// Open streams of one session.
pub struct StreamRegistry {
    owner: *const InstancePeer,
    session: SessionId,
    next_id: u64,
    streams: HashMap<StreamId, StreamRecord>,
    closed: VecDeque<(StreamId, NPReason)>,
}

impl StreamRegistry {
    pub(crate) fn new(owner: *const InstancePeer, session: SessionId) -> Self {
        Self {
            owner,
            session,
            next_id: 1,
            streams: HashMap::new(),
            closed: VecDeque::new(),
        }
    }

    /// Register a stream and build its native record. The native pointer
    /// stays valid until [`StreamRegistry::destroy`] returns the record and it
    /// is dropped.
    pub(crate) fn open(&mut self, spec: StreamSpec) -> StreamHandle {
        let id = StreamId(self.next_id);
        self.next_id += 1;

        let url = lossy_cstring(&spec.url);
        let mut peer = Box::new(StreamPeer {
            tag: STREAM_PEER_TAG,
            owner: self.owner,
            id,
        });
        let native = Box::new(NPStream {
            pdata: std::ptr::null_mut(),
            ndata: &mut *peer as *mut StreamPeer as *mut c_void,
            url: url.as_ptr(),
            end: spec.end,
            lastmodified: spec.last_modified,
            notify_data: spec.notify.map(|t| t.as_ptr()).unwrap_or(std::ptr::null_mut()),
        });
        let info = StreamInfo {
            id,
            session: self.session,
            direction: spec.direction,
            url: spec.url,
            mime_type: spec.mime_type,
            target: spec.target,
            seekable: spec.seekable,
            mode: NP_NORMAL,
            requested_ranges: Vec::new(),
        };
        log::debug!(
            "Session {}: opened stream {} ({:?}, '{}', {})",
            self.session,
            id,
            info.direction,
            info.mime_type,
            info.url
        );

        let mut record = StreamRecord {
            info,
            native,
            _peer: peer,
            _url: url,
            data: spec.data,
            sink: spec.sink,
            spool: None,
            transferred: 0,
        };
        let native = record.native_ptr();
        self.streams.insert(id, record);
        StreamHandle { id, native }
    }

    /// Identify a stream pointer handed back by the module.
    pub(crate) fn id_of(&self, native: *const NPStream) -> Option<StreamId> {
        let peer = unsafe { StreamPeer::from_native(native) }?;
        let record = self.streams.get(&peer.id)?;
        std::ptr::eq(&*record.native, native).then_some(peer.id)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn info(&self, id: StreamId) -> Option<StreamInfo> {
        self.streams.get(&id).map(|r| r.info.clone())
    }

    pub fn open_streams(&self) -> Vec<StreamInfo> {
        let mut infos: Vec<_> = self.streams.values().map(|r| r.info.clone()).collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Most recently destroyed streams with the reason they ended with.
    pub fn closed(&self) -> impl Iterator<Item = &(StreamId, NPReason)> {
        self.closed.iter()
    }

    pub(crate) fn native(&mut self, id: StreamId) -> Option<*mut NPStream> {
        self.streams.get_mut(&id).map(StreamRecord::native_ptr)
    }

    pub(crate) fn set_mode(&mut self, id: StreamId, mode: u16) {
        if let Some(record) = self.streams.get_mut(&id) {
            record.info.mode = mode;
        }
    }

    /// A module choosing `NP_SEEK` on a host-delivered stream whose data the
    /// core holds can read from it even if it was not advertised as seekable.
    pub(crate) fn mark_seekable(&mut self, id: StreamId) {
        if let Some(record) = self.streams.get_mut(&id) {
            if record.data.is_some() {
                record.info.seekable = true;
            }
        }
    }

    pub(crate) fn mode(&self, id: StreamId) -> Option<u16> {
        self.streams.get(&id).map(|r| r.info.mode)
    }

    /// Bytes handed to the module (or sink) so far.
    pub fn transferred(&self, id: StreamId) -> Option<u64> {
        self.streams.get(&id).map(|r| r.transferred)
    }

    /// Append to the file a `NP_ASFILE`/`NP_ASFILEONLY` stream is saved to.
    pub(crate) fn append_spool(&mut self, id: StreamId, data: &[u8]) -> Result<(), StreamError> {
        let record = self.streams.get_mut(&id).ok_or(StreamError::UnknownStream(id))?;
        if record.spool.is_none() {
            record.spool = Some(NamedTempFile::new()?);
        }
        if let Some(spool) = record.spool.as_mut() {
            spool.write_all(data)?;
        }
        Ok(())
    }

    /// Flush the spool file (creating an empty one if nothing arrived) and
    /// return its path for `NPP_StreamAsFile`.
    pub(crate) fn spool_path(&mut self, id: StreamId) -> Result<CString, StreamError> {
        self.append_spool(id, &[])?;
        let record = self.streams.get_mut(&id).ok_or(StreamError::UnknownStream(id))?;
        let spool = record.spool.as_mut().ok_or(StreamError::UnknownStream(id))?;
        spool.flush()?;
        Ok(lossy_cstring(&spool.path().to_string_lossy()))
    }

    pub(crate) fn note_transferred(&mut self, id: StreamId, bytes: u64) {
        if let Some(record) = self.streams.get_mut(&id) {
            record.transferred += bytes;
        }
    }

    /// Pass module output to the host sink of a module-created stream.
    pub(crate) fn write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, StreamError> {
        let record = self.streams.get_mut(&id).ok_or(StreamError::UnknownStream(id))?;
        let Some(sink) = record.sink.as_mut() else {
            return Err(StreamError::WrongDirection { id, operation: "write" });
        };
        let written = sink.write(data).map_err(|e| StreamError::Sink(e.to_string()))?;
        record.transferred += written as u64;
        Ok(written)
    }

    /// Remove a stream. Closes its sink, if any, with `reason`. The caller is
    /// responsible for telling the module about host-delivered streams before
    /// dropping the returned record.
    pub(crate) fn destroy(&mut self, id: StreamId, reason: NPReason) -> Result<StreamRecord, StreamError> {
        let mut record = self.streams.remove(&id).ok_or(StreamError::UnknownStream(id))?;
        if let Some(sink) = record.sink.as_mut() {
            sink.close(reason);
        }
        if self.closed.len() == CLOSED_HISTORY {
            self.closed.pop_front();
        }
        self.closed.push_back((id, reason));
        log::debug!(
            "Session {}: stream {} ended with {:?} after {} byte(s)",
            self.session,
            id,
            reason,
            record.transferred
        );
        Ok(record)
    }

    /// Record a partial-read request and decide who serves it.
    pub(crate) fn request_partial_read(
        &mut self,
        id: StreamId,
        ranges: Vec<ByteRange>,
    ) -> Result<ReadPlan, StreamError> {
        let record = self.streams.get_mut(&id).ok_or(StreamError::UnknownStream(id))?;
        if record.info.direction != StreamDirection::ToModule {
            return Err(StreamError::WrongDirection { id, operation: "request_read" });
        }
        if !record.info.seekable {
            return Err(StreamError::NotSeekable(id));
        }
        record.info.requested_ranges = ranges;
        match &record.data {
            Some(data) => {
                let total = data.len() as u64;
                let pieces = record
                    .info
                    .requested_ranges
                    .iter()
                    .filter_map(|range| range.resolve(total))
                    .map(|(start, len)| (start, data.clone(), len))
                    .collect();
                Ok(ReadPlan::Serve(pieces))
            }
            None => Ok(ReadPlan::Forward(record.info.clone())),
        }
    }

    /// Ids of every open stream, oldest first.
    pub(crate) fn open_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.streams.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("session", &self.session)
            .field("open", &self.open_ids())
            .finish()
    }
}
