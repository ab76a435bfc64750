//! Records, edits and replays desktop keyboard/mouse macros.
//!
//! The pipeline has three stages:
//!
//! 1. **Record**: a global [`hook::InputHook`] feeds raw events through a
//!    blocking [`queue::BlockingQueue`] into an
//!    [`log_buffer::EventLogBuffer`], which coalesces them (clicks, double
//!    clicks, scroll bursts, key auto-repeat, typed strings) into a compact
//!    event list.
//! 2. **Edit**: an [`edit_proxy::MacroEventEditProxy`] opens a session over
//!    one or more stored macros, applies edits with full undo/redo, and
//!    commits them to an [`store::EventStore`] transactionally.
//! 3. **Replay**: a [`activator::MacroActivator`] runs a macro on a worker
//!    thread with interruptible timing and guaranteed cleanup of held
//!    buttons and keys.
//!
//! ```no_run
//! use std::sync::Arc;
//! use macrotape::{
//!     activator::MacroActivator, inject::RdevInjector,
//!     store::{EventStore, MemoryStore},
//! };
//!
//! # fn main() -> macrotape::Result<()> {
//! let store = Arc::new(MemoryStore::load_from_file("macros.json")?);
//! let injector = Arc::new(RdevInjector::default());
//! let activator = MacroActivator::new(injector, Arc::clone(&store) as Arc<dyn EventStore>);
//! let events = store.events_for_macro(1)?;
//! let signals = activator.run_macro(events)?;
//! for signal in signals {
//!     println!("{signal:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod activator;
pub mod capture;
pub mod change_log;
pub mod edit;
pub mod edit_proxy;
pub mod error;
pub mod events;
pub mod hook;
pub mod inject;
pub mod keys;
pub mod log_buffer;
pub mod queue;
pub mod session;
pub mod store;

pub use activator::{ActivatorConfig, ActivatorSignal, MacroActivator};
pub use change_log::ChangeLog;
pub use edit::MacroEventEdit;
pub use edit_proxy::MacroEventEditProxy;
pub use error::{MacrotapeError, Result};
pub use events::{
    EventPayload, KeyboardEventData, KeyboardEventType, MacroEvent, MouseEventData,
    MouseEventType, Position, Rect,
};
pub use log_buffer::{EventLogBuffer, LogBufferConfig};
pub use session::{Recorder, RecorderConfig};
pub use store::{EventStore, MemoryStore};
