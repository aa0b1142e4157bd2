// Controller integration tests
// Drive the real dispatch loop over fake devices backed by datagram sockets

mod common;

use std::collections::HashSet;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, OnceLock};
use std::time::Duration;

use common::*;
use inputdev_core::event::{generate_code, EV_KEY};
use inputdev_core::{
    AppEvent, Controller, ControllerHandle, DumpScope, EventSink, Key, KeyMap, RepeatRate,
    SinkError,
};

fn paths(controller: &inputdev_core::Controller<FakeOpener>, scope: DumpScope) -> Vec<PathBuf> {
    controller.dump(scope).into_iter().map(|s| s.path).collect()
}

fn device(name: &str) -> PathBuf {
    PathBuf::from(DEVICE_ROOT).join(name)
}

/// Live instances are identified by path plus open descriptor
fn instances(controller: &inputdev_core::Controller<FakeOpener>, scope: DumpScope) -> Vec<(PathBuf, i32)> {
    controller
        .dump(scope)
        .into_iter()
        .map(|s| (s.path, s.fd))
        .collect()
}

fn assert_disjoint_membership(controller: &inputdev_core::Controller<FakeOpener>) {
    let active: HashSet<_> = instances(controller, DumpScope::Active).into_iter().collect();
    let gc: HashSet<_> = instances(controller, DumpScope::Gc).into_iter().collect();
    let all = instances(controller, DumpScope::All);

    assert!(active.is_disjoint(&gc));
    assert_eq!(all.len(), active.len() + gc.len());
    assert_eq!(all.into_iter().collect::<HashSet<_>>(), &active | &gc);
}

#[test]
fn test_add_grabs_and_remove_releases() {
    let opener = FakeOpener::default();
    let node = opener.insert("event0", FakeNode::keyboard(0x0d40));
    let (controller, _rx) = new_controller(&opener, options());

    assert!(controller.add_device("event0"));
    assert!(node.is_grabbed());
    assert_eq!(paths(&controller, DumpScope::Active), vec![device("event0")]);

    assert!(controller.remove_device("event0"));
    assert!(!node.is_grabbed());
    assert!(paths(&controller, DumpScope::Active).is_empty());
    assert_eq!(paths(&controller, DumpScope::Gc), vec![device("event0")]);
    assert_disjoint_membership(&controller);
}

#[test]
fn test_duplicate_device_number_is_rejected() {
    let opener = FakeOpener::default();
    let first = opener.insert("event0", FakeNode::keyboard(7));
    opener.insert("by-id-kbd", FakeNode::keyboard(7));
    let (controller, _rx) = new_controller(&opener, options());

    assert!(controller.add_device("event0"));
    assert!(controller.change_quirk("event0", "broken_repeat"));

    assert!(!controller.add_device("by-id-kbd"));
    assert!(!controller.add_device("event0"));

    let active = controller.dump(DumpScope::Active);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].path, device("event0"));
    assert!(active[0].quirks.broken_repeat);
    assert!(first.is_grabbed());
    assert!(paths(&controller, DumpScope::Gc).is_empty());
}

#[test]
fn test_remove_unknown_device_fails_without_mutation() {
    let opener = FakeOpener::default();
    opener.insert("event0", FakeNode::keyboard(1));
    opener.insert("event1", FakeNode::keyboard(2));
    let (controller, _rx) = new_controller(&opener, options());

    assert!(controller.add_device("event0"));
    assert!(!controller.remove_device("missing"));
    // node exists but was never added
    assert!(!controller.remove_device("event1"));

    assert_eq!(paths(&controller, DumpScope::Active), vec![device("event0")]);
    assert!(paths(&controller, DumpScope::Gc).is_empty());
}

#[test]
fn test_remove_after_node_vanished_reports_not_found() {
    let opener = FakeOpener::default();
    opener.insert("event0", FakeNode::keyboard(1));
    let (controller, _rx) = new_controller(&opener, options());

    assert!(controller.add_device("event0"));
    opener.delete("event0");
    assert!(!controller.remove_device("event0"));
    assert_eq!(paths(&controller, DumpScope::Active), vec![device("event0")]);
}

#[test]
fn test_rejects_devices_without_key_events() {
    let opener = FakeOpener::default();
    let mut mouse = FakeNode::keyboard(3);
    mouse.key_capable = false;
    opener.insert("mouse0", mouse);
    let (controller, _rx) = new_controller(&opener, options());

    assert!(!controller.add_device("mouse0"));
    assert!(!controller.add_device("nonexistent"));
    assert!(controller.dump(DumpScope::All).is_empty());
}

#[test]
fn test_grab_failure_goes_to_garbage() {
    let opener = FakeOpener::default();
    let mut busy = FakeNode::keyboard(4);
    busy.fail_grab = true;
    let busy = opener.insert("event4", busy);
    let (controller, _rx) = new_controller(&opener, options());

    assert!(!controller.add_device("event4"));
    assert!(!busy.is_grabbed());
    assert!(paths(&controller, DumpScope::Active).is_empty());
    assert_disjoint_membership(&controller);
}

#[test]
fn test_membership_over_add_remove_sequence() {
    let opener = FakeOpener::default();
    for (i, name) in ["event0", "event1", "event2"].iter().enumerate() {
        opener.insert(name, FakeNode::keyboard(i as u64 + 10));
    }
    let (controller, _rx) = new_controller(&opener, options());

    let steps: &[(&str, bool)] = &[
        ("event0", true),
        ("event1", true),
        ("event0", false),
        ("event2", true),
        ("event0", true),
        ("event1", false),
        ("event1", false),
        ("event2", false),
    ];

    for (name, add) in steps {
        if *add {
            controller.add_device(name);
        } else {
            controller.remove_device(name);
        }
        assert_disjoint_membership(&controller);
    }

    assert_eq!(paths(&controller, DumpScope::Active), vec![device("event0")]);
    assert_eq!(controller.dump(DumpScope::Gc).len(), 3);
    assert_eq!(controller.dump(DumpScope::All).len(), 4);
}

#[test]
fn test_events_are_translated_and_delivered() {
    let opener = FakeOpener::default();
    let node = opener.insert("event0", FakeNode::keyboard(1));
    let (mut controller, rx) = new_controller(&opener, options());
    assert!(controller.add_device("event0"));
    controller.start().unwrap();

    node.tap(Key::A.code());
    node.press(Key::LEFT_SHIFT.code());
    node.press(Key::A.code());
    node.key(Key::OK.code(), 2);

    let expected = [
        AppEvent::Translated {
            symbol: 'a',
            repeat: false,
            release: false,
        },
        AppEvent::Translated {
            symbol: 'a',
            repeat: false,
            release: true,
        },
        AppEvent::Translated {
            symbol: 'A',
            repeat: false,
            release: false,
        },
        AppEvent::Raw {
            opcode: generate_code(EV_KEY, Key::OK.code(), 2),
            repeat: true,
            release: false,
        },
    ];
    for want in expected {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), want);
    }

    controller.stop();
}

#[test]
fn test_magic_sequence_detaches_device() {
    let opener = FakeOpener::default();
    let node = opener.insert("event0", FakeNode::keyboard(1));
    let (mut controller, rx) = new_controller(&opener, options());
    assert!(controller.add_device("event0"));
    controller.start().unwrap();

    node.tap(Key::LEFT_SHIFT.code());
    node.tap(Key::RIGHT_SHIFT.code());
    node.tap(Key::ESC.code());
    node.press(Key::LEFT_SHIFT.code());

    assert!(wait_until(WAIT, || controller.dump(DumpScope::All).is_empty()));
    assert!(!node.is_grabbed());

    // only the ESC press and release reach the sink
    let delivered: Vec<_> = rx.try_iter().collect();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|e| matches!(e, AppEvent::Raw { .. })));

    controller.stop();
}

#[test]
fn test_vanished_device_is_collected() {
    let opener = FakeOpener::default();
    let node = opener.insert("event0", FakeNode::keyboard(1));
    let other = opener.insert("event1", FakeNode::keyboard(2));
    let (mut controller, rx) = new_controller(&opener, options());
    assert!(controller.add_device("event0"));
    assert!(controller.add_device("event1"));
    controller.start().unwrap();

    node.unplug();
    assert!(wait_until(WAIT, || {
        paths(&controller, DumpScope::All) == vec![device("event1")]
    }));

    other.tap(Key::Z.code());
    assert!(matches!(
        rx.recv_timeout(WAIT).unwrap(),
        AppEvent::Translated { symbol: 'z', .. }
    ));

    controller.stop();
}

#[test]
fn test_garbage_is_swept_after_next_wake() {
    let opener = FakeOpener::default();
    opener.insert("event0", FakeNode::keyboard(1));
    let keep = opener.insert("event1", FakeNode::keyboard(2));
    let (mut controller, rx) = new_controller(&opener, options());
    assert!(controller.add_device("event0"));
    assert!(controller.add_device("event1"));
    controller.start().unwrap();

    assert!(controller.remove_device("event0"));
    assert_eq!(paths(&controller, DumpScope::Gc), vec![device("event0")]);

    keep.tap(Key::Q.code());
    rx.recv_timeout(WAIT).unwrap();
    assert!(wait_until(WAIT, || controller.dump(DumpScope::Gc).is_empty()));
    assert_eq!(paths(&controller, DumpScope::Active), vec![device("event1")]);

    controller.stop();
}

#[test]
fn test_repeat_rate_partial_failure_is_not_rolled_back() {
    let opener = FakeOpener::default();
    let good = opener.insert("event0", FakeNode::keyboard(1));
    let mut bad = FakeNode::keyboard(2);
    bad.reject_repeat = true;
    let bad = opener.insert("event1", bad);
    let (controller, _rx) = new_controller(&opener, options());
    assert!(controller.add_device("event0"));
    assert!(controller.add_device("event1"));

    let rate = RepeatRate::new(500, 100);
    assert!(!controller.set_repeat_rate(rate));
    assert_eq!(good.repeat(), Some(rate));
    assert_eq!(bad.repeat(), Some(RepeatRate::new(250, 33)));
    assert_eq!(controller.default_repeat_rate(), None);

    let summaries = controller.dump(DumpScope::Active);
    assert_eq!(summaries[0].repeat, Some(rate));
    assert_eq!(summaries[1].repeat, None);

    assert!(controller.remove_device("event1"));
    assert!(controller.set_repeat_rate(rate));
    assert_eq!(controller.default_repeat_rate(), Some(rate));
}

#[test]
fn test_default_repeat_rate_applied_and_restored() {
    let opener = FakeOpener::default();
    let node = opener.insert("event0", FakeNode::keyboard(1));
    let mut opts = options();
    opts.repeat = Some(RepeatRate::new(600, 50));
    let (controller, _rx) = new_controller(&opener, opts);

    assert!(controller.add_device("event0"));
    assert_eq!(node.repeat(), Some(RepeatRate::new(600, 50)));

    drop(controller);
    assert_eq!(node.repeat(), Some(RepeatRate::new(250, 33)));
    assert!(!node.is_grabbed());
}

#[test]
fn test_quirk_changes() {
    let opener = FakeOpener::default();
    opener.insert("event0", FakeNode::keyboard(1));
    let (controller, _rx) = new_controller(&opener, options());
    assert!(controller.add_device("event0"));

    let quirks = |c: &inputdev_core::Controller<FakeOpener>| c.dump(DumpScope::Active)[0].quirks;

    assert!(controller.change_quirk("event0", "+broken_repeat"));
    assert!(quirks(&controller).broken_repeat);
    assert!(!controller.change_quirk("event0", "no_such_quirk"));
    assert!(quirks(&controller).broken_repeat);
    assert!(controller.change_quirk("event0", "-BROKEN_REPEAT"));
    assert!(!quirks(&controller).broken_repeat);
    assert!(!controller.change_quirk("event9", "broken_repeat"));
}

#[test]
fn test_control_protocol() {
    let opener = FakeOpener::default();
    let node = opener.insert("event0", FakeNode::keyboard(1));
    let (mut controller, _rx) = new_controller(&opener, options());

    let socket = scratch_path("ctl");
    controller.open_control_socket(&socket).unwrap();
    assert!(controller.open_control_socket(&socket).is_err());
    controller.start().unwrap();

    let client = UnixDatagram::unbound().unwrap();
    let send = |msg: &[u8]| {
        client.send_to(msg, &socket).unwrap();
    };

    send(b"add input-event0\n");
    send(b"bogus event0\n");
    send(&[b'x'; 127]);
    send(b"CHANGE event0\n");
    assert!(wait_until(WAIT, || controller.dump(DumpScope::Active).len() == 1));
    assert!(node.is_grabbed());

    send(b"quirk:broken_repeat event0\n");
    assert!(wait_until(WAIT, || {
        controller.dump(DumpScope::Active)[0].quirks.broken_repeat
    }));

    send(b"dump all\n");
    send(b"remove event0\n");
    assert!(wait_until(WAIT, || controller.dump(DumpScope::Active).is_empty()));
    assert!(!node.is_grabbed());
    assert!(controller.is_running());

    controller.stop();
    assert!(!controller.is_running());
    drop(controller);
    assert!(!socket.exists());
}

#[test]
fn test_coldplug_adds_directory_entries() {
    let opener = FakeOpener::default();
    opener.insert("event0", FakeNode::keyboard(1));
    opener.insert("event1", FakeNode::keyboard(2));

    let dir = scratch_path("coldplug");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("event0"), b"").unwrap();
    std::fs::write(dir.join("event1"), b"").unwrap();

    let mut opts = options();
    opts.coldplug_dir = dir.clone();
    let (controller, _rx) = new_controller(&opener, opts.clone());
    assert!(controller.initialize());
    let mut active = paths(&controller, DumpScope::Active);
    active.sort();
    assert_eq!(active, vec![device("event0"), device("event1")]);
    drop(controller);

    std::fs::write(dir.join("event5"), b"").unwrap();
    let (controller, _rx) = new_controller(&opener, opts);
    assert!(!controller.initialize());
    assert_eq!(controller.dump(DumpScope::Active).len(), 2);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_missing_coldplug_dir_is_not_fatal() {
    let opener = FakeOpener::default();
    let mut opts = options();
    opts.coldplug_dir = scratch_path("absent");
    let (controller, _rx) = new_controller(&opener, opts);
    assert!(controller.initialize());
}

#[test]
fn test_stop_is_prompt_and_idempotent() {
    let opener = FakeOpener::default();
    let (mut controller, _rx) = new_controller(&opener, options());
    controller.start().unwrap();
    assert!(controller.is_running());
    assert!(controller.start().is_err());

    let started = std::time::Instant::now();
    controller.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!controller.is_running());
    controller.stop();
}

#[test]
fn test_controller_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Controller<FakeOpener>>();
    assert_send_sync::<ControllerHandle<FakeOpener>>();
}

/// Sink that detaches `device` from inside `deliver`
struct DetachingSink {
    controller: Arc<OnceLock<ControllerHandle<FakeOpener>>>,
    device: String,
    tx: mpsc::Sender<(AppEvent, bool)>,
}

impl EventSink for DetachingSink {
    fn deliver(&self, event: AppEvent) -> Result<(), SinkError> {
        let removed = self
            .controller
            .get()
            .is_some_and(|c| c.remove_device(&self.device));
        self.tx
            .send((event, removed))
            .map_err(|_| SinkError::Disconnected)
    }
}

#[test]
fn test_sink_can_remove_its_own_device() {
    let opener = FakeOpener::default();
    let node = opener.insert("event0", FakeNode::keyboard(1));
    let other = opener.insert("event1", FakeNode::keyboard(2));

    let slot = Arc::new(OnceLock::new());
    let (tx, rx) = mpsc::channel();
    let sink = DetachingSink {
        controller: Arc::clone(&slot),
        device: "event0".to_string(),
        tx,
    };
    let mut controller =
        Controller::new(opener.clone(), sink, Arc::new(KeyMap::new()), options()).unwrap();
    assert!(slot.set(controller.handle()).is_ok());

    assert!(controller.add_device("event0"));
    assert!(controller.add_device("event1"));
    controller.start().unwrap();

    node.press(Key::A.code());
    let (event, removed) = rx.recv_timeout(WAIT).unwrap();
    assert!(!event.is_release());
    assert!(removed);

    assert_eq!(paths(&controller, DumpScope::Active), vec![device("event1")]);
    assert!(!node.is_grabbed());
    assert!(other.is_grabbed());
    assert_disjoint_membership(&controller);
    assert!(wait_until(WAIT, || controller.dump(DumpScope::Gc).is_empty()));

    controller.stop();
}

#[test]
fn test_handle_fails_after_controller_dropped() {
    let opener = FakeOpener::default();
    opener.insert("event0", FakeNode::keyboard(1));
    let (controller, _rx) = new_controller(&opener, options());
    let handle = controller.handle();

    assert!(handle.add_device("event0"));
    assert_eq!(handle.dump(DumpScope::Active).len(), 1);
    drop(controller);

    assert!(!handle.remove_device("event0"));
    assert!(handle.dump(DumpScope::All).is_empty());
}

#[test]
fn test_coldplug_keeps_non_utf8_names() {
    let name = OsStr::from_bytes(b"event\xff");
    let opener = FakeOpener::default();
    opener.insert(name, FakeNode::keyboard(1));

    let dir = scratch_path("coldplug-raw");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), b"").unwrap();

    let mut opts = options();
    opts.coldplug_dir = dir.clone();
    let (controller, _rx) = new_controller(&opener, opts);
    assert!(controller.initialize());
    assert_eq!(
        paths(&controller, DumpScope::Active),
        vec![PathBuf::from(DEVICE_ROOT).join(name)]
    );

    drop(controller);
    std::fs::remove_dir_all(&dir).unwrap();
}
