#![cfg(test)]

use std::ffi::{c_void, CStr};
use std::path::PathBuf;

use crate::abi::types::{NPError, NPReason};
use crate::host::HostServiceError;
use crate::plugin_system::error::StreamError;
use crate::plugin_system::instance::SessionInstance;
use crate::plugin_system::notify::PostData;
use crate::plugin_system::stream::DeliveryOutcome;
use crate::plugin_system::tests::fake_module::{self, Event, Script};
use crate::plugin_system::tests::support::{load, started, take_requests, with_host};

const TOKEN: usize = 0xBEEF;

fn notifications() -> Vec<(String, NPReason, usize)> {
    fake_module::events()
        .into_iter()
        .filter_map(|e| match e {
            Event::UrlNotify { url, reason, token } => Some((url, reason, token)),
            _ => None,
        })
        .collect()
}

fn get_url_notify(session: &SessionInstance, url: &CStr, target: Option<&CStr>, token: usize) -> NPError {
    let target = target.map_or(std::ptr::null(), CStr::as_ptr);
    unsafe { (fake_module::host().geturlnotify.unwrap())(session.npp(), url.as_ptr(), target, token as *mut c_void) }
}

fn get_url(session: &SessionInstance, url: &CStr, target: Option<&CStr>) -> NPError {
    let target = target.map_or(std::ptr::null(), CStr::as_ptr);
    unsafe { (fake_module::host().geturl.unwrap())(session.npp(), url.as_ptr(), target) }
}

#[test]
fn test_token_comes_back_exactly_once() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    assert_eq!(get_url_notify(&session, c"http://example.test/data", None, TOKEN), NPError::NO_ERROR);
    assert_eq!(session.pending_notifications(), 1);

    let request = take_requests().pop().unwrap();
    assert_eq!(request.url(), "http://example.test/data");
    assert!(request.wants_notification());
    assert_eq!(request.session(), session.id());
    let responder = request.into_responder();
    assert_eq!(responder.notify_token().map(|t| t.as_ptr() as usize), Some(TOKEN));

    let outcome = responder.deliver("text/plain", b"payload".to_vec()).unwrap();
    assert_eq!(outcome, DeliveryOutcome::Finished(NPReason::DONE));
    let announced = fake_module::events().into_iter().find_map(|e| match e {
        Event::NewStream { notify, .. } => Some(notify),
        _ => None,
    });
    assert_eq!(announced, Some(TOKEN));
    assert!(notifications().is_empty(), "notified before completion");

    responder.complete(NPReason::DONE);
    assert_eq!(
        notifications(),
        vec![("http://example.test/data".to_string(), NPReason::DONE, TOKEN)]
    );
    assert_eq!(session.pending_notifications(), 0);

    drop(session);
    assert_eq!(notifications().len(), 1);
}

#[test]
fn test_request_made_during_start() {
    let plugin = load(Script {
        notify_on_new: Some((c"http://example.test/boot", TOKEN)),
        ..Script::default()
    });
    let session = started(&plugin);
    assert!(fake_module::events().contains(&Event::HostCall {
        name: "geturlnotify",
        status: NPError::NO_ERROR,
    }));
    let responder = take_requests().pop().unwrap().into_responder();
    responder.complete(NPReason::DONE);
    assert_eq!(notifications().len(), 1);
    drop(session);
}

#[test]
fn test_dropped_responder_reports_network_error() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    get_url_notify(&session, c"http://example.test/lost", None, TOKEN);
    drop(take_requests());
    assert_eq!(
        notifications(),
        vec![("http://example.test/lost".to_string(), NPReason::NETWORK_ERR, TOKEN)]
    );
    drop(session);
    assert_eq!(notifications().len(), 1);
}

#[test]
fn test_destroyed_session_breaks_pending_requests() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    get_url_notify(&session, c"http://example.test/one", None, 1);
    get_url_notify(&session, c"http://example.test/two", None, 2);
    let requests = take_requests();

    session.destroy().unwrap();
    assert_eq!(
        notifications(),
        vec![
            ("http://example.test/one".to_string(), NPReason::USER_BREAK, 1),
            ("http://example.test/two".to_string(), NPReason::USER_BREAK, 2),
        ]
    );
    // Notifications come before the instance is destroyed.
    let events = fake_module::events();
    let last_notify = events.iter().rposition(|e| matches!(e, Event::UrlNotify { .. })).unwrap();
    let destroy = events.iter().position(|e| *e == Event::Destroy).unwrap();
    assert!(last_notify < destroy);

    let mut requests = requests.into_iter();
    let late = requests.next().unwrap().into_responder();
    assert!(matches!(late.deliver("text/plain", b"late".to_vec()), Err(StreamError::SessionInactive)));
    late.complete(NPReason::DONE);
    drop(requests);
    assert_eq!(notifications().len(), 2);
}

#[test]
fn test_refused_request_is_never_notified() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    with_host(|log| log.refuse = Some(|| HostServiceError::InvalidUrl("nowhere".to_string())));
    let status = get_url_notify(&session, c"nowhere", None, TOKEN);
    assert_eq!(status, NPError::INVALID_URL);
    assert_eq!(session.pending_notifications(), 0);
    drop(session);
    assert!(notifications().is_empty());
}

#[test]
fn test_completion_inside_the_host_call() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    with_host(|log| log.complete_inline = Some(NPReason::DONE));
    assert_eq!(get_url_notify(&session, c"http://example.test/fast", None, TOKEN), NPError::NO_ERROR);
    assert_eq!(notifications(), vec![("http://example.test/fast".to_string(), NPReason::DONE, TOKEN)]);
    assert_eq!(session.pending_notifications(), 0);
    drop(session);
    assert_eq!(notifications().len(), 1);
}

#[test]
fn test_refusal_after_completion_is_not_reported() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    with_host(|log| {
        log.complete_inline = Some(NPReason::DONE);
        log.refuse = Some(|| HostServiceError::Refused("too late".to_string()));
    });
    let status = get_url_notify(&session, c"http://example.test/both", None, TOKEN);
    assert_eq!(status, NPError::NO_ERROR);
    assert_eq!(notifications(), vec![("http://example.test/both".to_string(), NPReason::DONE, TOKEN)]);
    assert_eq!(session.pending_notifications(), 0);
    drop(session);
    assert_eq!(notifications().len(), 1);
}

#[test]
fn test_panic_after_completion_is_not_reported() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    with_host(|log| log.complete_inline = Some(NPReason::NETWORK_ERR));
    let status = get_url_notify(&session, c"panic-after:http://example.test/x", None, TOKEN);
    assert_eq!(status, NPError::NO_ERROR);
    assert_eq!(
        notifications(),
        vec![("panic-after:http://example.test/x".to_string(), NPReason::NETWORK_ERR, TOKEN)]
    );
    drop(session);
    assert_eq!(notifications().len(), 1);
}

#[test]
fn test_drop_inside_the_host_call() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    with_host(|log| log.drop_inline = true);
    assert_eq!(get_url_notify(&session, c"http://example.test/gone", None, TOKEN), NPError::NO_ERROR);
    assert_eq!(
        notifications(),
        vec![("http://example.test/gone".to_string(), NPReason::NETWORK_ERR, TOKEN)]
    );
    assert_eq!(session.pending_notifications(), 0);
}

#[test]
fn test_panicking_host_service_refuses_the_request() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    let status = get_url_notify(&session, c"panic:now", None, TOKEN);
    assert_eq!(status, NPError::GENERIC_ERROR);
    assert_eq!(session.pending_notifications(), 0);
    drop(session);
    assert!(notifications().is_empty());
}

#[test]
fn test_plain_requests_have_no_notification() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    assert_eq!(get_url(&session, c"http://example.test/page", Some(c"_blank")), NPError::NO_ERROR);
    assert_eq!(get_url(&session, c"http://example.test/self", Some(c"")), NPError::NO_ERROR);

    let requests = take_requests();
    assert_eq!(requests[0].target(), Some("_blank"));
    assert_eq!(requests[1].target(), None);
    assert!(!requests[0].wants_notification());
    for request in requests {
        request.into_responder().complete(NPReason::DONE);
    }
    assert_eq!(session.pending_notifications(), 0);
    assert!(notifications().is_empty());
}

#[test]
fn test_bad_request_arguments() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    let host = fake_module::host();
    let status = unsafe { (host.geturl.unwrap())(std::ptr::null_mut(), c"http://x".as_ptr(), std::ptr::null()) };
    assert_eq!(status, NPError::INVALID_INSTANCE_ERROR);
    let status = unsafe { (host.geturl.unwrap())(session.npp(), std::ptr::null(), std::ptr::null()) };
    assert_eq!(status, NPError::INVALID_URL);
    assert!(take_requests().is_empty());
}

#[test]
fn test_post_bodies() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    let host = fake_module::host();
    let body = b"a=1&b=2";
    let status = unsafe {
        (host.posturl.unwrap())(
            session.npp(),
            c"http://example.test/form".as_ptr(),
            std::ptr::null(),
            body.len() as u32,
            body.as_ptr() as *const _,
            0,
        )
    };
    assert_eq!(status, NPError::NO_ERROR);

    let file = b"file:///tmp/upload.bin";
    let status = unsafe {
        (host.posturlnotify.unwrap())(
            session.npp(),
            c"http://example.test/upload".as_ptr(),
            std::ptr::null(),
            file.len() as u32,
            file.as_ptr() as *const _,
            1,
            TOKEN as *mut c_void,
        )
    };
    assert_eq!(status, NPError::NO_ERROR);

    let posts = with_host(|log| std::mem::take(&mut log.posts));
    assert_eq!(
        posts,
        vec![
            ("http://example.test/form".to_string(), PostData::Buffer(body.to_vec())),
            ("http://example.test/upload".to_string(), PostData::File(PathBuf::from("/tmp/upload.bin"))),
        ]
    );
    assert_eq!(session.pending_notifications(), 1);
    drop(take_requests());
    assert_eq!(notifications().len(), 1);
}
