//! A typed Rust driver for coqtop's XML IDE protocol
//!
//! This crate runs `coqtop -ideslave` as a subprocess and keeps an ordered log
//! of the commands sent to it. coqtop checks proofs on background workers and
//! reports progress out of order; the engine folds those reports back into the
//! log so an editor can show what is sent, checked, warned about or broken,
//! and can roll coqtop back to any earlier command.
//!
//! # Quick Start
//!
//! ```no_run
//! use coqtop_codes::{Engine, Position, Response};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new();
//!     engine.restart(coqtop_codes::project::project_args_for("theories/Foo.v".as_ref())?)?;
//!
//!     match engine.advance("Lemma foo: True.", Position::new(0, 16, 16))? {
//!         Response::Ok { .. } => println!("accepted"),
//!         Response::Err(failure) => eprintln!("rejected: {}", failure.message),
//!     }
//!
//!     // Step back out of the lemma.
//!     engine.rewind(1, false)?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`] - XML wire codec and incremental stream decoder
//! - [`types`] - Tagged protocol values (`Value`, `Goals`, ...)
//! - [`messages`] - Responses, feedback and diagnostics as decoded
//! - [`command`] - The command log and its state machine
//! - [`feedback`] - Applies feedback to the command log
//! - [`engine`] - Session lifecycle and the call/response operations
//! - [`driver`] - Background sending with foreground signalling
//! - [`client_async`] - Tokio facade (feature `async-client`)
//! - [`cli`] - Builder for the coqtop command line
//! - [`project`] - `_CoqProject` argument loading
//! - [`version`] - coqtop version check
//!
//! # Version Compatibility
//!
//! Tested against coqtop **8.6.1**; a newer coqtop triggers a one-time
//! warning through the `log` facade.

pub mod cli;
#[cfg(feature = "async-client")]
pub mod client_async;
pub mod command;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod messages;
pub mod project;
pub mod protocol;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod transport;
pub mod types;
pub mod version;
pub mod xml;

pub use cli::CoqtopBuilder;
#[cfg(feature = "async-client")]
pub use client_async::AsyncEngine;
pub use command::{
    position_from_offset, Command, CommandLog, CommandState, Highlights, Position, Range, Severity,
};
pub use diagnostics::MessageLog;
pub use driver::SendSignal;
pub use engine::Engine;
pub use error::{DecodeError, Error, Result};
pub use feedback::FeedbackProcessor;
pub use messages::{
    DiagnosticMessage, Failure, Feedback, FeedbackContent, FeedbackTarget, Incoming,
    MessageLevel, Response, Span,
};
pub use protocol::{Decoded, Protocol, StreamDecoder};
pub use transport::Channel;
pub use types::{EditId, Either, Goal, Goals, OptionState, StateId, Status, Value};
