//! Recording sessions: an [`InputHook`] feeding an [`EventLogBuffer`].

use std::sync::Arc;

use tracing::info;

use crate::capture::ScreenCapture;
use crate::error::Result;
use crate::events::{EventPayload, MacroEvent};
use crate::hook::{EventSink, InputHook};
use crate::log_buffer::{EventLogBuffer, LogBufferConfig};
use crate::store::EventStore;

/// What a [`Recorder`] captures and how a recording is finalized.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Record mouse clicks, scrolls and presses.
    pub record_mouse: bool,

    /// Record keyboard input.
    pub record_keyboard: bool,

    /// Events dropped from the end of the recording on stop. The default of
    /// 1 swallows the stop hotkey's own keystroke.
    pub discard_tail: usize,

    /// Coalescing and capture tunables passed to the log buffer.
    pub log_buffer: LogBufferConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_mouse: true,
            record_keyboard: true,
            discard_tail: 1,
            log_buffer: LogBufferConfig::default(),
        }
    }
}

/// Filters hook events by class before they reach the log buffer.
struct ClassFilter {
    buffer: Arc<EventLogBuffer>,
    record_mouse: bool,
    record_keyboard: bool,
}

impl EventSink for ClassFilter {
    fn handle_event(&self, event: MacroEvent) {
        let keep = match &event.payload {
            EventPayload::Mouse(_) => self.record_mouse,
            EventPayload::Keyboard(_) => self.record_keyboard,
            EventPayload::Dummy => false,
        };
        if keep {
            self.buffer.handle_event(event);
        }
    }
}

/// Glues a hook to a log buffer for one or more recording takes.
pub struct Recorder {
    hook: Arc<dyn InputHook>,
    buffer: Arc<EventLogBuffer>,
    config: RecorderConfig,
}

impl Recorder {
    pub fn new(
        hook: Arc<dyn InputHook>,
        store: Arc<dyn EventStore>,
        capture: Arc<dyn ScreenCapture>,
        config: RecorderConfig,
    ) -> Self {
        let buffer = EventLogBuffer::new(store, capture, config.log_buffer.clone());
        Self {
            hook,
            buffer,
            config,
        }
    }

    /// Starts capturing. Events recorded now are appended (`index == -1`)
    /// unless [`Recorder::set_insert_index`] was called.
    pub fn start(&self) -> Result<()> {
        let filter = Arc::new(ClassFilter {
            buffer: Arc::clone(&self.buffer),
            record_mouse: self.config.record_mouse,
            record_keyboard: self.config.record_keyboard,
        });
        self.hook.set_sink(filter);
        self.hook.activate()?;
        info!("recording started");
        Ok(())
    }

    /// Numbers the next take's events from `base`, for insertion into an
    /// existing macro.
    pub fn set_insert_index(&self, base: i32) {
        self.buffer.set_insert_index(base);
    }

    /// Stops capturing and returns the coalesced take. The configured tail
    /// (the stop gesture itself) is discarded.
    pub fn stop(&self) -> Result<Vec<MacroEvent>> {
        self.hook.deactivate();
        let events = self.buffer.take_added_events(self.config.discard_tail)?;
        info!(events = events.len(), "recording stopped");
        Ok(events)
    }

    /// Releases the consumer thread. The recorder cannot be restarted after
    /// this.
    pub fn shutdown(&self) {
        self.buffer.shutdown();
    }
}
