//! Replay engine integration tests against a mock injector.

mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use common::{Action, MockInjector, ShiftedLocator};
use macrotape::events::{
    KeyboardEventData, KeyboardEventType, MouseEventData, MouseEventType, Position, Rect,
};
use macrotape::inject::{InputInjector, MouseButton};
use macrotape::keys;
use macrotape::{
    ActivatorConfig, ActivatorSignal, MacroActivator, MacroEvent, MacrotapeError, MemoryStore,
};

fn fast_config() -> ActivatorConfig {
    ActivatorConfig {
        cursor_step_rate: 2.0,
        cursor_jump_px: 10_000, // jump straight to targets in tests
        sleep_chunk_ms: 5,
        settle_delay_ms: 0,
    }
}

fn activator(injector: &Arc<MockInjector>) -> MacroActivator {
    let store = Arc::new(MemoryStore::new());
    MacroActivator::new(Arc::clone(injector) as Arc<dyn InputInjector>, store)
        .with_config(fast_config())
}

fn click_at(x: i32, y: i32) -> MacroEvent {
    MacroEvent::mouse(MouseEventData::new(
        MouseEventType::LeftClick,
        Position::new(x, y),
    ))
}

fn wait_for_stop(rx: &mpsc::Receiver<ActivatorSignal>) -> Option<String> {
    loop {
        match rx.recv_timeout(Duration::from_secs(5)).expect("signal") {
            ActivatorSignal::Stopped { error } => return error,
            ActivatorSignal::Activating(_) => {}
        }
    }
}

#[test]
fn click_moves_then_presses_and_releases() {
    let injector = Arc::new(MockInjector::default());
    let activator = activator(&injector);

    let rx = activator.run_macro(vec![click_at(40, 60)]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);

    let actions = injector.actions();
    let move_at = actions
        .iter()
        .position(|a| *a == Action::Move(Position::new(40, 60)))
        .expect("cursor moved to click point");
    let press_at = actions
        .iter()
        .position(|a| *a == Action::Press(MouseButton::Left))
        .expect("button pressed");
    assert!(move_at < press_at);
    assert_eq!(injector.count(&Action::Release(MouseButton::Left)), 1);
    assert!(!activator.is_running());
}

#[test]
fn interrupt_after_press_issues_exactly_one_corrective_release() {
    let injector = Arc::new(MockInjector::default());
    let activator = activator(&injector);

    let mut press = MacroEvent::mouse(MouseEventData::new(
        MouseEventType::LeftPress,
        Position::new(10, 10),
    ));
    press.delay_ms = 0;
    let mut never_runs = click_at(10, 10);
    never_runs.delay_ms = 60_000;

    let rx = activator.run_macro(vec![press, never_runs]).unwrap();

    // First Activating is the press, second is the long-delayed click; once
    // we see the second the press has fully executed.
    let mut activating_seen = 0;
    while activating_seen < 2 {
        match rx.recv_timeout(Duration::from_secs(5)).expect("signal") {
            ActivatorSignal::Activating(_) => activating_seen += 1,
            ActivatorSignal::Stopped { .. } => panic!("stopped before interrupt"),
        }
    }
    activator.stop_macro();
    assert_eq!(wait_for_stop(&rx), None);

    assert_eq!(injector.count(&Action::Press(MouseButton::Left)), 1);
    assert_eq!(injector.count(&Action::Release(MouseButton::Left)), 1);
}

#[test]
fn second_run_while_running_is_rejected() {
    let injector = Arc::new(MockInjector::default());
    let activator = activator(&injector);

    let mut slow = click_at(0, 0);
    slow.delay_ms = 60_000;
    let rx = activator.run_macro(vec![slow]).unwrap();

    assert!(matches!(
        activator.run_macro(vec![click_at(0, 0)]),
        Err(MacrotapeError::AlreadyRunning)
    ));

    activator.stop_macro();
    wait_for_stop(&rx);
    // Idle again: a new run is accepted.
    let rx = activator.run_macro(vec![click_at(1, 1)]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);
}

#[test]
fn key_string_pastes_with_quotes_unescaped() {
    let injector = Arc::new(MockInjector::default());
    let activator = activator(&injector);

    let mut data = KeyboardEventData::new(KeyboardEventType::KeyString, keys::NONE);
    data.key_string = "it''s".into();
    let mut event = MacroEvent::keyboard(data);
    event.duration_ms = 4_000; // ignored for key strings

    let rx = activator.run_macro(vec![event]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);
    assert_eq!(injector.actions(), vec![Action::Paste("it's".into())]);
}

#[test]
fn modifiers_wrap_the_key_and_release_in_reverse() {
    let injector = Arc::new(MockInjector::default());
    let activator = activator(&injector);

    let mut data = KeyboardEventData::new(KeyboardEventType::KeyType, b'A' as i32);
    data.mod1 = keys::SHIFT;
    data.mod2 = keys::CONTROL;
    data.num_lock = true;
    let rx = activator.run_macro(vec![MacroEvent::keyboard(data)]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);

    assert_eq!(
        injector.actions(),
        vec![
            Action::KeyDown(keys::SHIFT),
            Action::KeyDown(keys::CONTROL),
            Action::KeyDown(b'A' as i32),
            Action::KeyUp(b'A' as i32),
            Action::KeyUp(keys::CONTROL),
            Action::KeyUp(keys::SHIFT),
        ]
    );
}

#[test]
fn caps_lock_toggles_only_on_mismatch_and_back_off() {
    let injector = Arc::new(MockInjector::new(false, true));
    let activator = activator(&injector);

    let mut data = KeyboardEventData::new(KeyboardEventType::KeyType, b'H' as i32);
    data.caps_lock = true;
    data.num_lock = true;
    let rx = activator.run_macro(vec![MacroEvent::keyboard(data)]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);

    // Toggled on for the event, toggled back off after.
    assert_eq!(injector.count(&Action::KeyDown(keys::CAPS_LOCK)), 2);
    assert!(!injector.caps_lock_on().unwrap());
}

#[test]
fn matching_lock_state_is_left_alone() {
    let injector = Arc::new(MockInjector::new(false, true));
    let activator = activator(&injector);

    let mut data = KeyboardEventData::new(KeyboardEventType::KeyType, b'H' as i32);
    data.num_lock = true;
    let rx = activator.run_macro(vec![MacroEvent::keyboard(data)]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);

    assert_eq!(injector.count(&Action::KeyDown(keys::CAPS_LOCK)), 0);
    assert_eq!(injector.count(&Action::KeyDown(keys::NUM_LOCK)), 0);
}

#[test]
fn navigation_keys_force_num_lock_off() {
    let injector = Arc::new(MockInjector::new(false, true));
    let activator = activator(&injector);

    let mut data = KeyboardEventData::new(KeyboardEventType::KeyType, keys::HOME);
    data.num_lock = true; // recorded on, but Home replays with it off
    let rx = activator.run_macro(vec![MacroEvent::keyboard(data)]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);

    assert_eq!(injector.count(&Action::KeyDown(keys::NUM_LOCK)), 1);
}

#[test]
fn coalesced_scrolls_replay_each_repeat() {
    let injector = Arc::new(MockInjector::default());
    let activator = activator(&injector);

    let mut scroll = MacroEvent::mouse(MouseEventData::new(
        MouseEventType::ScrollUp,
        Position::new(0, 0),
    ));
    scroll.n_repeats = 2;
    scroll.duration_ms = 30;
    let rx = activator.run_macro(vec![scroll]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);

    assert_eq!(injector.count(&Action::Scroll(1)), 3);
}

#[test]
fn injection_failure_is_reported_and_cleaned_up() {
    let injector = Arc::new(MockInjector::failing_on_press());
    let activator = activator(&injector);

    let rx = activator.run_macro(vec![click_at(5, 5)]).unwrap();
    let error = wait_for_stop(&rx).expect("error reported");
    assert!(error.contains("press refused"));
    // The press never happened, but the click still owes a release.
    assert_eq!(injector.count(&Action::Release(MouseButton::Left)), 1);
    assert!(!activator.is_running());
}

#[test]
fn auto_correct_shifts_the_click_point() {
    let injector = Arc::new(MockInjector::default());
    let store = Arc::new(MemoryStore::new());
    let activator = MacroActivator::new(Arc::clone(&injector) as Arc<dyn InputInjector>, store)
        .with_config(fast_config())
        .with_locator(Arc::new(ShiftedLocator { dx: 15, dy: -5 }));

    let mut data = MouseEventData::new(MouseEventType::LeftClick, Position::new(100, 100));
    data.auto_correct = true;
    data.screenshot_image = Some(image::RgbaImage::new(8, 8));
    data.screenshot_rect = Rect::new(80, 80, 40, 40);
    let rx = activator.run_macro(vec![MacroEvent::mouse(data)]).unwrap();
    assert_eq!(wait_for_stop(&rx), None);

    assert_eq!(injector.count(&Action::Move(Position::new(115, 95))), 1);
}

#[test]
fn dummy_events_are_skipped() {
    let injector = Arc::new(MockInjector::default());
    let activator = activator(&injector);

    let rx = activator
        .run_macro(vec![MacroEvent::dummy(0), click_at(1, 1)])
        .unwrap();
    assert_eq!(wait_for_stop(&rx), None);
    assert_eq!(injector.count(&Action::Press(MouseButton::Left)), 1);
}
