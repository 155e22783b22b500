//! Supervision of the wrapped game server process.
//!
//! The supervisor launches the configured executable with piped output and
//! runs one interceptor task per stream. Each interceptor hands raw chunks and
//! complete lines to the registered [`OutputSink`]s:
//!
//! ```text
//!  child stdout ─┐                ┌─▶ ForwardSink ──────▶ sidecar stdout/stderr
//!                ├─▶ intercept ───┤
//!  child stderr ─┘  (LineSplitter)└─▶ EventDispatchSink ─▶ parse_line ─▶ event queue
//! ```
//!
//! [`GameProcess::wait`] resolves with an [`ExitOutcome`] once the child
//! exits on its own or is killed on cancellation.

pub mod error;
pub mod lines;
pub mod manager;
pub mod sink;

pub use error::{Result, SupervisorError};
pub use lines::{LineSplitter, SplitLine};
pub use manager::{ExitOutcome, GameProcess, Supervisor, intercept};
pub use sink::{EventDispatchSink, ForwardSink, LineEvent, OutputSink, StreamKind};
