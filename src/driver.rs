//! Background sending of a batch of commands.
//!
//! [`Engine::send_async`] hands a list of commands to one background thread
//! that advances them in order and stops at the first one that is not
//! accepted. The foreground loops on [`Engine::wait_for_result`], redrawing
//! between wakeups, until it sees [`SendSignal::SEND_FINISHED`].
//!
//! ```no_run
//! use coqtop_codes::{Engine, Position, SendSignal};
//!
//! let engine = Engine::new();
//! engine.restart(Vec::<String>::new())?;
//! engine.send_async(vec![
//!     ("Lemma foo: True.".to_string(), Position::new(0, 16, 16)),
//!     ("Proof. exact I. Qed.".to_string(), Position::new(1, 20, 20)),
//! ])?;
//! loop {
//!     let signal = engine.wait_for_result();
//!     if signal.contains(SendSignal::MESSAGE_RECEIVED) {
//!         eprintln!("{}", engine.get_messages());
//!     }
//!     if signal.contains(SendSignal::SEND_FINISHED) {
//!         break;
//!     }
//! }
//! engine.finish_send();
//! # Ok::<(), coqtop_codes::Error>(())
//! ```

use crate::command::Position;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::messages::Response;
use log::{debug, warn};
use std::ops::{BitOr, BitOrAssign};
use std::sync::PoisonError;
use std::thread;

/// Set of conditions raised by the send driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SendSignal(u8);

impl SendSignal {
    /// Some command changed state.
    pub const STATE_CHANGED: SendSignal = SendSignal(0b001);
    /// A command failed or coqtop died; there is something to show.
    pub const MESSAGE_RECEIVED: SendSignal = SendSignal(0b010);
    /// The background send loop has exited.
    pub const SEND_FINISHED: SendSignal = SendSignal(0b100);

    pub const fn empty() -> Self {
        SendSignal(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: SendSignal) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SendSignal) {
        self.0 |= other.0;
    }

    /// Return the current bits and clear them.
    pub fn take(&mut self) -> SendSignal {
        std::mem::take(self)
    }
}

impl BitOr for SendSignal {
    type Output = SendSignal;

    fn bitor(self, rhs: SendSignal) -> SendSignal {
        SendSignal(self.0 | rhs.0)
    }
}

impl BitOrAssign for SendSignal {
    fn bitor_assign(&mut self, rhs: SendSignal) {
        self.insert(rhs);
    }
}

impl Engine {
    /// Advance each `(text, end)` in order on a background thread.
    ///
    /// Any previous batch is joined first, so at most one send loop runs per
    /// engine.
    pub fn send_async(&self, commands: Vec<(String, Position)>) -> Result<()> {
        self.finish_send();
        self.lock().signals = SendSignal::empty();

        let engine = self.clone();
        let handle = thread::Builder::new()
            .name("coqtop-send".to_string())
            .spawn(move || engine.send_loop(commands))
            .map_err(Error::Io)?;
        *self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn send_loop(&self, commands: Vec<(String, Position)>) {
        let total = commands.len();
        for (sent, (text, end)) in commands.into_iter().enumerate() {
            let result = self.advance(&text, end);
            let mut bits = SendSignal::STATE_CHANGED;
            let accepted = matches!(result, Ok(Response::Ok { .. }));
            if !accepted {
                bits |= SendSignal::MESSAGE_RECEIVED;
            }

            let mut state = self.lock();
            if let Err(e) = &result {
                warn!("[DRIVER] advance failed: {}", e);
                state.messages.push_unique(&e.to_string());
            }
            self.signal(&mut state, bits);
            drop(state);

            if !accepted {
                debug!("[DRIVER] Stopped after {} of {} command(s)", sent + 1, total);
                break;
            }
        }
        self.signal(&mut self.lock(), SendSignal::SEND_FINISHED);
    }

    /// Block until some signal is raised, then return and clear all of them.
    pub fn wait_for_result(&self) -> SendSignal {
        let mut state = self.lock();
        while state.signals.is_empty() {
            state = self
                .inner
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.signals.take()
    }

    /// Join the background send loop, if one was started.
    pub fn finish_send(&self) {
        let handle = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("[DRIVER] Send thread panicked");
            }
        }
    }

    /// True while a send loop is still running.
    pub fn is_sending(&self) -> bool {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
