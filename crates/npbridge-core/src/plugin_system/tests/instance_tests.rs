#![cfg(test)]

use std::ffi::c_void;

use crate::abi::types::{NPError, NPNVariable, NPRect};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::instance::{InstanceConfig, InstanceMode, SavedData, WindowGeometry};
use crate::plugin_system::tests::fake_module::{self, Event, Script};
use crate::plugin_system::tests::support::{load, started};
use crate::plugin_system::traits::{InterfaceId, PluginFactory, PluginValue, PluginVariable};
use crate::utils::SendPtr;

#[test]
fn test_start_passes_type_mode_and_attributes() {
    let plugin = load(Script::default());
    let session = plugin.create_instance(&InterfaceId::PLUGIN_INSTANCE).unwrap();
    assert!(!session.is_started());

    session
        .start(
            InstanceConfig::new("application/x-fake")
                .with_mode(InstanceMode::Full)
                .attribute("src", "movie.fake")
                .attribute("loop", "true"),
        )
        .unwrap();
    assert!(session.is_started());

    let new = fake_module::events().into_iter().find(|e| matches!(e, Event::New { .. }));
    assert_eq!(
        new,
        Some(Event::New {
            mime: "application/x-fake".to_string(),
            mode: 2,
            args: vec![
                ("src".to_string(), "movie.fake".to_string()),
                ("loop".to_string(), "true".to_string()),
            ],
            saved: None,
        })
    );
}

#[test]
fn test_sessions_get_distinct_handles() {
    let plugin = load(Script::default());
    let first = started(&plugin);
    let second = started(&plugin);
    assert_ne!(first.id(), second.id());
    assert_ne!(first.npp(), second.npp());
    assert!(unsafe { !(*first.npp()).ndata.is_null() });
    assert_eq!(plugin.outstanding_sessions(), 2);
}

#[test]
fn test_start_twice_is_invalid() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    let err = session.start(InstanceConfig::new("application/x-fake")).unwrap_err();
    assert!(matches!(err, PluginSystemError::InvalidState { .. }), "got {:?}", err);
    assert_eq!(fake_module::count(|e| matches!(e, Event::New { .. })), 1);
}

#[test]
fn test_calls_before_start_are_invalid() {
    let plugin = load(Script::default());
    let session = plugin.create_instance(&InterfaceId::PLUGIN_INSTANCE).unwrap();
    let err = session.set_window(&WindowGeometry::default()).unwrap_err();
    assert_eq!(err.to_np_error(), NPError::INVALID_INSTANCE_ERROR);
    assert!(session.handle_event(std::ptr::null_mut()).is_err());

    drop(session);
    // Never started, so the module is not asked to destroy it.
    assert_eq!(fake_module::count(|e| *e == Event::Destroy), 0);
}

#[test]
fn test_refused_start_reports_module_status() {
    let plugin = load(Script {
        new_status: NPError::INVALID_PARAM,
        ..Script::default()
    });
    let session = plugin.create_instance(&InterfaceId::PLUGIN_INSTANCE).unwrap();
    let err = session.start(InstanceConfig::new("application/x-fake")).unwrap_err();
    match &err {
        PluginSystemError::ModuleCall { operation, status, .. } => {
            assert_eq!(operation, "NPP_New");
            assert_eq!(*status, NPError::INVALID_PARAM);
        }
        other => panic!("Expected ModuleCall, got {:?}", other),
    }
    assert!(!session.is_started());
}

#[test]
fn test_window_record_keeps_its_address() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    let mut geometry = WindowGeometry {
        handle: SendPtr(0x1234 as *mut c_void),
        width: 320,
        height: 240,
        clip: NPRect { top: 0, left: 0, bottom: 240, right: 320 },
        ..WindowGeometry::default()
    };
    session.set_window(&geometry).unwrap();
    geometry.width = 640;
    geometry.height = 480;
    session.set_window(&geometry).unwrap();

    let windows: Vec<_> = fake_module::events()
        .into_iter()
        .filter_map(|e| match e {
            Event::SetWindow { width, height, window } => Some((width, height, window)),
            _ => None,
        })
        .collect();
    assert_eq!(windows.len(), 2);
    assert_eq!((windows[0].0, windows[0].1), (320, 240));
    assert_eq!((windows[1].0, windows[1].1), (640, 480));
    assert_eq!(windows[0].2, windows[1].2);
}

#[test]
fn test_events_and_printing_reach_the_module() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    assert!(session.handle_event(std::ptr::null_mut()).unwrap());
    session.print(std::ptr::null_mut()).unwrap();
    assert_eq!(fake_module::count(|e| *e == Event::HandleEvent), 1);
    assert_eq!(fake_module::count(|e| *e == Event::Print), 1);
}

#[test]
fn test_instance_values() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    assert_eq!(
        session.get_value(PluginVariable::NameString).unwrap(),
        PluginValue::String("Fake Instance".to_string())
    );
    assert_eq!(session.get_value(PluginVariable::WindowBool).unwrap(), PluginValue::Bool(true));

    let err = session.get_value(PluginVariable::TransparentBool).unwrap_err();
    assert_eq!(err.to_np_error(), NPError::GENERIC_ERROR);
}

#[test]
fn test_missing_set_value_slot() {
    let plugin = load(Script::default());
    let session = started(&plugin);
    let err = session
        .set_value(NPNVariable::JAVASCRIPT_ENABLED_BOOL, std::ptr::null_mut())
        .unwrap_err();
    assert!(
        matches!(&err, PluginSystemError::MissingEntryPoint { symbol, .. } if symbol == "NPP_SetValue"),
        "got {:?}",
        err
    );
}

#[test]
fn test_destroy_returns_saved_state_and_runs_once() {
    let plugin = load(Script {
        saved_on_destroy: Some(b"frame=42".to_vec()),
        ..Script::default()
    });
    let session = started(&plugin);
    let saved = session.destroy().unwrap();
    assert_eq!(saved, Some(SavedData(b"frame=42".to_vec())));
    assert_eq!(fake_module::count(|e| *e == Event::Destroy), 1);
    assert_eq!(plugin.outstanding_sessions(), 0);
}

#[test]
fn test_saved_state_is_handed_to_the_next_session() {
    let plugin = load(Script {
        saved_on_destroy: Some(b"resume here".to_vec()),
        ..Script::default()
    });
    let saved = started(&plugin).destroy().unwrap().unwrap();

    let session = plugin.create_instance(&InterfaceId::PLUGIN_INSTANCE).unwrap();
    session
        .start(InstanceConfig::new("application/x-fake").with_saved(saved))
        .unwrap();
    let restored = fake_module::events().into_iter().rev().find_map(|e| match e {
        Event::New { saved, .. } => Some(saved),
        _ => None,
    });
    assert_eq!(restored, Some(Some(b"resume here".to_vec())));
}

#[test]
fn test_dropping_a_session_destroys_it() {
    let plugin = load(Script::default());
    {
        let _session = started(&plugin);
    }
    assert_eq!(fake_module::count(|e| *e == Event::Destroy), 1);
    assert_eq!(plugin.outstanding_sessions(), 0);
}
