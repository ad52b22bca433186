//! Tokio facade over the blocking [`Engine`].
//!
//! coqtop is driven over blocking pipes, so every operation here moves the
//! work onto tokio's blocking pool and awaits it.
//!
//! ```no_run
//! use coqtop_codes::{AsyncEngine, Position};
//!
//! # async fn example() -> coqtop_codes::Result<()> {
//! let engine = AsyncEngine::new();
//! engine.restart(Vec::new()).await?;
//! engine.advance("Lemma foo: True.", Position::new(0, 16, 16)).await?;
//! let goals = engine.goals().await?;
//! println!("{:?}", goals);
//! # Ok(())
//! # }
//! ```

use crate::cli::CoqtopBuilder;
use crate::command::Position;
use crate::driver::SendSignal;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::messages::Response;
use crate::transport::Channel;
use log::debug;

/// Async handle to a coqtop session. Clones share the session.
#[derive(Debug, Clone, Default)]
pub struct AsyncEngine {
    engine: Engine,
}

impl From<Engine> for AsyncEngine {
    fn from(engine: Engine) -> Self {
        Self { engine }
    }
}

impl AsyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builder(builder: CoqtopBuilder) -> Self {
        Self {
            engine: Engine::with_builder(builder),
        }
    }

    /// The underlying blocking engine, for log snapshots and highlights.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Engine) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        debug!("[ASYNC] {}", op);
        tokio::task::spawn_blocking(move || f(engine))
            .await
            .map_err(|e| Error::Unknown(format!("{} task failed: {}", op, e)))?
    }

    pub async fn restart(&self, args: Vec<String>) -> Result<()> {
        self.blocking("restart", move |engine| engine.restart(args))
            .await
    }

    pub async fn start(&self, channel: Channel) -> Result<()> {
        self.blocking("start", move |engine| engine.start(channel))
            .await
    }

    pub async fn advance<S: Into<String>>(&self, text: S, end: Position) -> Result<Response> {
        let text = text.into();
        self.blocking("advance", move |engine| engine.advance(&text, end))
            .await
    }

    pub async fn rewind(&self, steps: usize, keep_history: bool) -> Result<Response> {
        self.blocking("rewind", move |engine| engine.rewind(steps, keep_history))
            .await
    }

    pub async fn query<S: Into<String>>(&self, text: S) -> Result<Response> {
        let text = text.into();
        self.blocking("query", move |engine| engine.query(&text))
            .await
    }

    pub async fn goals(&self) -> Result<Response> {
        self.blocking("goals", |engine| engine.goals(|| {}))
            .await
    }

    /// Send every command through the background driver and wait until it
    /// finishes. Returns every signal raised along the way.
    pub async fn send_all(&self, commands: Vec<(String, Position)>) -> Result<SendSignal> {
        self.blocking("send_all", move |engine| {
            engine.send_async(commands)?;
            let mut seen = SendSignal::empty();
            loop {
                let signal = engine.wait_for_result();
                seen |= signal;
                if signal.contains(SendSignal::SEND_FINISHED) {
                    break;
                }
            }
            engine.finish_send();
            Ok(seen)
        })
        .await
    }

    /// Wait for the next batch of driver signals.
    pub async fn wait_for_result(&self) -> Result<SendSignal> {
        self.blocking("wait_for_result", |engine| Ok(engine.wait_for_result()))
            .await
    }

    pub async fn kill(&self) -> Result<()> {
        self.blocking("kill", |engine| {
            engine.kill();
            Ok(())
        })
        .await
    }
}
