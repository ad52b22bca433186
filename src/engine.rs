//! The protocol engine: one coqtop session and its command log.
//!
//! [`Engine`] is cheap to clone; clones share the same session. Every public
//! operation is a single call/response round trip. The shared state (command
//! log, message log, connection handle) lives behind one mutex, while the
//! actual pipe I/O happens under the connection's own lock so a slow coqtop
//! never blocks readers of the log.
//!
//! # Example
//!
//! ```no_run
//! use coqtop_codes::{Engine, Position};
//!
//! let engine = Engine::new();
//! engine.restart(Vec::<String>::new())?;
//! let response = engine.advance("Lemma foo: True.", Position::new(0, 16, 16))?;
//! assert!(response.is_ok());
//! let goals = engine.goals(|| {})?;
//! println!("{:?}", goals.into_value());
//! # Ok::<(), coqtop_codes::Error>(())
//! ```

use crate::cli::CoqtopBuilder;
use crate::command::{Command, CommandLog, Highlights, Position};
use crate::diagnostics::MessageLog;
use crate::driver::SendSignal;
use crate::error::{DecodeError, Error, Result};
use crate::feedback::FeedbackProcessor;
use crate::messages::{Failure, FeedbackContent, Incoming, Response};
use crate::protocol::{calls, Decoded, Protocol};
use crate::transport::{Channel, Connection, Pipes};
use crate::types::{StateId, Value};
use crate::version;
use log::{debug, info, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use uuid::Uuid;

/// State guarded by the engine lock.
pub(crate) struct State {
    pub(crate) connection: Option<Arc<Connection>>,
    pub(crate) log: CommandLog,
    pub(crate) messages: MessageLog,
    pub(crate) signals: SendSignal,
    session: Option<Uuid>,
}

pub(crate) struct Inner {
    pub(crate) state: Mutex<State>,
    pub(crate) changed: Condvar,
    pub(crate) sender: Mutex<Option<JoinHandle<()>>>,
    builder: Mutex<CoqtopBuilder>,
}

/// What one parsed batch of coqtop output amounted to.
enum Batch {
    Value(Response),
    Feedback,
    Died,
}

/// Handle to a coqtop session.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<Inner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Engine")
            .field("session", &state.session)
            .field("running", &state.connection.is_some())
            .field("active_count", &state.log.active_count())
            .finish()
    }
}

impl Engine {
    /// An engine that launches `coqtop` from `PATH`.
    pub fn new() -> Self {
        Self::with_builder(CoqtopBuilder::new())
    }

    /// An engine that launches coqtop as configured by `builder`.
    pub fn with_builder(builder: CoqtopBuilder) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    connection: None,
                    log: CommandLog::new(),
                    messages: MessageLog::new(),
                    signals: SendSignal::empty(),
                    session: None,
                }),
                changed: Condvar::new(),
                sender: Mutex::new(None),
                builder: Mutex::new(builder),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise `bits` for the send driver and wake any waiter.
    pub(crate) fn signal(&self, state: &mut State, bits: SendSignal) {
        state.signals.insert(bits);
        self.inner.changed.notify_all();
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Kill any running coqtop, spawn a fresh one with `args` appended to
    /// the base flags, and initialise the session.
    pub fn restart<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kill();
        let builder = {
            let mut builder = self
                .inner
                .builder
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            builder.set_args(args.into_iter().map(Into::into).collect());
            builder.clone()
        };
        version::check_coqtop_version(builder.program());
        let child = builder.spawn()?;
        info!("[ENGINE] Spawned coqtop (pid {})", child.id());
        self.start(Channel::from_child(child)?)
    }

    /// Initialise a session over an already connected channel.
    pub fn start(&self, channel: Channel) -> Result<()> {
        self.kill();
        let session = Uuid::new_v4();
        {
            let mut state = self.lock();
            state.connection = Some(Arc::new(Connection::new(channel)));
            state.session = Some(session);
        }

        let result = self
            .call(calls::INIT, &Value::none(), &mut || {})
            .and_then(|response| match response {
                Response::Ok { value, .. } => Ok(value.into_state_id()?),
                Response::Err(failure) => Err(Error::Protocol(format!(
                    "Init rejected: {}",
                    failure.message
                ))),
            });

        match result {
            Ok(root) => {
                let mut state = self.lock();
                state.log.reset(root);
                info!("[ENGINE] Session {} started at state {}", session, root);
                self.signal(&mut state, SendSignal::STATE_CHANGED);
                Ok(())
            }
            Err(e) => {
                warn!("[ENGINE] Session {} failed to start: {}", session, e);
                self.kill();
                Err(e)
            }
        }
    }

    /// Terminate coqtop and forget the command and message logs.
    pub fn kill(&self) {
        let connection = {
            let mut state = self.lock();
            state.log.clear();
            state.messages.clear();
            if let Some(session) = state.session.take() {
                info!("[ENGINE] Ending session {}", session);
            }
            state.connection.take()
        };
        if let Some(connection) = connection {
            connection.terminate();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().connection.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.lock().session
    }

    // ------------------------------------------------------------------
    // Protocol operations
    // ------------------------------------------------------------------

    /// Submit `text`, which ends at `end` in the source, as a new command.
    pub fn advance(&self, text: &str, end: Position) -> Result<Response> {
        let (edit_id, current) = {
            let mut state = self.lock();
            let Some(current) = state.log.current_state_id() else {
                return Ok(Response::Err(Failure::process_died()));
            };
            let edit_id = state.log.push(end);
            self.signal(&mut state, SendSignal::STATE_CHANGED);
            (edit_id, current)
        };

        let arg = Value::pair(
            Value::pair(Value::str(text), Value::Int(edit_id.0)),
            Value::pair(Value::StateId(current), Value::Bool(true)),
        );
        let result = self.call(calls::ADD, &arg, &mut || {});

        let mut state = self.lock();
        let outcome = match result {
            Ok(response @ Response::Ok { .. }) => match response.value().and_then(added_state_id) {
                Some(state_id) => {
                    debug!("[ENGINE] Edit {} is state {}", edit_id, state_id);
                    state.log.confirm(edit_id, state_id);
                    Ok(response)
                }
                None => {
                    state.log.abandon(edit_id, None);
                    let found = response.value().map_or("nothing", Value::kind);
                    Err(Error::Decode(DecodeError::UnexpectedShape {
                        expected: "pair(state_id, _)",
                        found: found.to_string(),
                    }))
                }
            },
            Ok(Response::Err(failure)) => {
                debug!("[ENGINE] Edit {} rejected: {}", edit_id, failure.message);
                state.log.abandon(edit_id, failure.loc);
                state.messages.push_unique(&failure.message);
                Ok(Response::Err(failure))
            }
            Err(e) => {
                state.log.abandon(edit_id, None);
                Err(e)
            }
        };
        self.signal(&mut state, SendSignal::STATE_CHANGED);
        outcome
    }

    /// Revert the newest `steps` commands and move coqtop back with
    /// `Edit_at`. With `keep_history` the reverted commands stay in the log
    /// (for diagnostic ranges) until [`Engine::clear_messages`].
    pub fn rewind(&self, steps: usize, keep_history: bool) -> Result<Response> {
        let target = {
            let mut state = self.lock();
            let target = state.log.rewind(steps, keep_history)?;
            self.signal(&mut state, SendSignal::STATE_CHANGED);
            target
        };
        info!("[ENGINE] Rewound {} step(s) to state {}", steps, target);
        self.call(calls::EDIT_AT, &Value::StateId(target), &mut || {})
    }

    /// Rewind every command that ends after `(line, column)`.
    pub fn rewind_to(&self, line: usize, column: usize) -> Result<Option<Response>> {
        let steps = self
            .lock()
            .log
            .steps_past(Position::new(line, column, 0));
        if steps == 0 {
            return Ok(None);
        }
        self.rewind(steps, false).map(Some)
    }

    /// Run `text` as a query at the current state. The log is untouched.
    pub fn query(&self, text: &str) -> Result<Response> {
        let Some(current) = self.current_state_id() else {
            return Ok(Response::Err(Failure::process_died()));
        };
        let arg = Value::pair(Value::str(text), Value::StateId(current));
        self.call(calls::QUERY, &arg, &mut || {})
    }

    /// Ask for the goals at the current state.
    ///
    /// If coqtop rejects the request and names an earlier state to go back
    /// to, the log is rewound there (history kept) and the request retried
    /// once. `on_feedback` runs whenever a batch of feedback arrives before
    /// the answer.
    pub fn goals<F>(&self, mut on_feedback: F) -> Result<Response>
    where
        F: FnMut(),
    {
        let response = self.call(calls::GOAL, &Value::Unit, &mut on_feedback)?;
        let Response::Err(failure) = &response else {
            return Ok(response);
        };

        let target = match failure.revert_to {
            Some(target) if target != StateId::BEFORE_INIT => target,
            _ => {
                self.lock().messages.push_unique(&failure.message);
                return Ok(response);
            }
        };

        let steps = self.lock().log.steps_to_revert(target);
        warn!(
            "[ENGINE] Goal failed ({}); reverting {} step(s) toward state {}",
            failure.message, steps, target
        );
        if steps > 0 {
            let rewound = self.rewind(steps, true)?;
            if rewound.process_died() {
                return Ok(rewound);
            }
        }
        self.call(calls::GOAL, &Value::Unit, &mut on_feedback)
    }

    /// Keep reading coqtop's output until no live command is still
    /// unchecked. Call after [`Engine::goals`], which is what makes coqtop
    /// start checking.
    pub fn wait_until_checked<F>(&self, mut on_update: F) -> Result<()>
    where
        F: FnMut(),
    {
        while self.has_unchecked_commands() {
            let Some(connection) = self.lock().connection.clone() else {
                break;
            };
            let mut pipes = connection.lock_pipes();
            match self.read_batch(&connection, &mut pipes)? {
                Batch::Died => break,
                Batch::Value(response) => {
                    warn!("[ENGINE] Unsolicited response: {:?}", response);
                }
                Batch::Feedback => {}
            }
            drop(pipes);
            on_update();
        }
        on_update();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Log access
    // ------------------------------------------------------------------

    pub fn has_unchecked_commands(&self) -> bool {
        self.lock().log.has_unchecked()
    }

    /// Every diagnostic received since the last clear, newline separated.
    pub fn get_messages(&self) -> String {
        self.lock().messages.joined()
    }

    /// Drop accumulated messages and the reverted history.
    pub fn clear_messages(&self) {
        let mut state = self.lock();
        state.messages.clear();
        state.log.clear_reverted();
    }

    /// Snapshot of the whole log, live commands first.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().log.commands().to_vec()
    }

    pub fn active_count(&self) -> usize {
        self.lock().log.active_count()
    }

    pub fn current_state_id(&self) -> Option<StateId> {
        self.lock().log.current_state_id()
    }

    /// End of the newest live command.
    pub fn last_end(&self) -> Option<Position> {
        self.lock().log.last_end()
    }

    /// Ranges to highlight. `source(start, end)` must return the buffer text
    /// between two positions. It runs without the engine lock held, so it
    /// may call back into the engine.
    pub fn highlights<F>(&self, source: F) -> Highlights
    where
        F: FnMut(Position, Position) -> String,
    {
        let mut snapshot = self.lock().log.clone();
        let highlights = snapshot.highlights(source);
        self.lock().log.store_resolved(snapshot.commands());
        highlights
    }

    // ------------------------------------------------------------------
    // Wire
    // ------------------------------------------------------------------

    /// Send one call and read until its `<value>` arrives.
    fn call(&self, name: &str, arg: &Value, on_feedback: &mut dyn FnMut()) -> Result<Response> {
        let Some(connection) = self.lock().connection.clone() else {
            debug!("[ENGINE] {} skipped: coqtop is not running", name);
            return Ok(Response::Err(Failure::process_died()));
        };

        let bytes = Protocol::encode_call(name, arg)?;
        debug!("[ENGINE] Sending: {}", String::from_utf8_lossy(&bytes));

        let mut pipes = connection.lock_pipes();
        if let Err(e) = pipes.send(&bytes) {
            return Ok(self.handle_death(&connection, &e.to_string()));
        }

        loop {
            match self.read_batch(&connection, &mut pipes)? {
                Batch::Value(response) => return Ok(response),
                Batch::Died => return Ok(Response::Err(Failure::process_died())),
                Batch::Feedback => on_feedback(),
            }
        }
    }

    /// Read until the accumulated output parses, then dispatch it.
    fn read_batch(&self, connection: &Arc<Connection>, pipes: &mut Pipes) -> Result<Batch> {
        let elements = loop {
            match pipes.read_chunk() {
                Ok(0) => {
                    self.handle_death(connection, "end of stream");
                    return Ok(Batch::Died);
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.handle_death(connection, &e.to_string());
                    return Ok(Batch::Died);
                }
            }
            if let Decoded::Parsed(elements) = pipes.decoder.try_parse() {
                break elements;
            }
        };

        let mut state = self.lock();
        let mut response = None;
        let mut malformed_value = None;
        let mut attached: Option<String> = None;
        let mut changed = false;
        for element in &elements {
            debug!("[ENGINE] Received <{}>", element.tag);
            let incoming = match Protocol::decode_incoming(element) {
                Ok(Some(incoming)) => incoming,
                Ok(None) => continue,
                Err(e) if element.tag == "value" => {
                    warn!("[DECODE] Malformed <value>: {}", e);
                    if malformed_value.is_none() {
                        malformed_value = Some(e);
                    }
                    continue;
                }
                Err(e) => {
                    warn!("[DECODE] Skipping malformed <{}>: {}", element.tag, e);
                    continue;
                }
            };
            let State { log, messages, .. } = &mut *state;
            let mut processor = FeedbackProcessor::new(log, messages);
            match incoming {
                Incoming::Value(value) => {
                    if response.is_some() {
                        warn!("[ENGINE] Dropping extra <value> in one batch");
                    } else {
                        response = Some(value);
                    }
                }
                Incoming::Message(message) => {
                    changed |= processor.apply_message(&message);
                }
                Incoming::Feedback(feedback) => {
                    if let FeedbackContent::Message(message) = &feedback.content {
                        attached = Some(message.text.clone());
                    }
                    changed |= processor.apply(&feedback);
                }
            }
        }
        if changed {
            self.signal(&mut state, SendSignal::STATE_CHANGED);
        }
        if let (None, Some(e)) = (&response, malformed_value) {
            return Err(e.into());
        }

        Ok(match response {
            Some(response) => Batch::Value(attach_message(response, attached, &mut state.messages)),
            None => Batch::Feedback,
        })
    }

    fn handle_death(&self, connection: &Arc<Connection>, reason: &str) -> Response {
        warn!("[ENGINE] coqtop died: {}", reason);
        {
            let mut state = self.lock();
            if state
                .connection
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, connection))
            {
                state.connection = None;
            }
            self.signal(&mut state, SendSignal::STATE_CHANGED);
        }
        connection.terminate();
        Response::Err(Failure::process_died())
    }
}

/// State id out of an `Add` answer: `pair(state_id, ...)`.
fn added_state_id(value: &Value) -> Option<StateId> {
    match value {
        Value::Pair(first, _) => match **first {
            Value::StateId(id) => Some(id),
            _ => None,
        },
        _ => None,
    }
}

/// Merge a feedback diagnostic that arrived in the same batch as a value.
fn attach_message(
    response: Response,
    attached: Option<String>,
    messages: &mut MessageLog,
) -> Response {
    let Some(text) = attached else {
        return response;
    };
    match response {
        Response::Ok { value, .. } => Response::Ok {
            value,
            message: Some(text),
        },
        Response::Err(mut failure) => {
            messages.push_unique(&failure.message);
            failure.message = text;
            Response::Err(failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandState;
    use crate::messages::PROCESS_DIED_MESSAGE;
    use crate::testing::ScriptedCoqtop;

    fn add_ok(state: i64) -> String {
        ScriptedCoqtop::add_ok(state)
    }

    fn started() -> (Engine, ScriptedCoqtop) {
        let coqtop = ScriptedCoqtop::new();
        coqtop.reply(ScriptedCoqtop::init_ok(1));
        let engine = Engine::new();
        engine.start(coqtop.channel()).unwrap();
        (engine, coqtop)
    }

    #[test]
    fn test_start_seeds_root() {
        let (engine, coqtop) = started();
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.current_state_id(), Some(StateId(1)));
        assert!(engine.session_id().is_some());
        assert_eq!(
            coqtop.calls(),
            vec![r#"<call val="Init"><option val="none"/></call>"#]
        );
    }

    #[test]
    fn test_start_rejected_init() {
        let coqtop = ScriptedCoqtop::new();
        coqtop.reply(r#"<value val="fail"><state_id val="0"/>nope</value>"#);
        let engine = Engine::new();
        let err = engine.start(coqtop.channel()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_advance_sends_current_state() {
        let (engine, coqtop) = started();
        coqtop.reply(&add_ok(2));
        let response = engine
            .advance("Lemma foo: True.", Position::new(0, 16, 16))
            .unwrap();
        assert!(response.is_ok());
        assert_eq!(
            coqtop.calls()[1],
            concat!(
                r#"<call val="Add"><pair><pair><string>Lemma foo: True.</string><int>-1</int></pair>"#,
                r#"<pair><state_id val="1"/><bool val="true"/></pair></pair></call>"#
            )
        );
        assert_eq!(engine.current_state_id(), Some(StateId(2)));
    }

    #[test]
    fn test_feedback_message_attaches_to_ok() {
        let (engine, coqtop) = started();
        coqtop.reply(&format!(
            r#"<feedback object="state" route="0"><state_id val="2"/><feedback_content val="message"><message><message_level val="notice"/><option val="none"/><richpp><_>foo is defined</_></richpp></message></feedback_content></feedback>{}"#,
            add_ok(2)
        ));
        let response = engine.advance("Definition foo := 1.", Position::new(0, 20, 20)).unwrap();
        match response {
            Response::Ok { message, .. } => assert_eq!(message.as_deref(), Some("foo is defined")),
            other => panic!("expected Ok, got {:?}", other),
        }
        assert_eq!(engine.get_messages(), "foo is defined");
    }

    #[test]
    fn test_feedback_message_overrides_err() {
        let (engine, coqtop) = started();
        coqtop.reply(concat!(
            r#"<feedback object="edit" route="0"><edit_id val="-1"/><feedback_content val="message"><message><message_level val="error"/><option val="none"/><richpp><_>Syntax error: '.' expected.</_></richpp></message></feedback_content></feedback>"#,
            r#"<value val="fail" loc_s="3" loc_e="4"><state_id val="1"/><richpp><_>Error</_></richpp></value>"#
        ));
        let response = engine.advance("Foo bar", Position::new(0, 7, 7)).unwrap();
        let failure = response.failure().unwrap();
        assert_eq!(failure.message, "Syntax error: '.' expected.");
        let messages = engine.get_messages();
        assert!(messages.contains("Syntax error: '.' expected."));
        assert!(messages.contains("Error"));
        assert_eq!(messages.lines().count(), 2);
    }

    #[test]
    fn test_death_mid_call() {
        let (engine, _coqtop) = started();
        // No reply scripted: the fake closes its output.
        let response = engine.advance("Qed.", Position::new(1, 4, 4)).unwrap();
        assert!(response.process_died());
        assert_eq!(response.failure().unwrap().message, PROCESS_DIED_MESSAGE);
        assert!(!engine.is_running());
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.commands()[1].state, CommandState::Abandoned);

        // Fails fast afterwards.
        assert!(engine.query("Check nat.").unwrap().process_died());
    }

    #[test]
    fn test_query_does_not_touch_log() {
        let (engine, coqtop) = started();
        coqtop.reply(r#"<value val="good"><string>nat : Set</string></value>"#);
        let response = engine.query("Check nat.").unwrap();
        assert_eq!(response.into_value(), Some(Value::str("nat : Set")));
        assert_eq!(engine.active_count(), 1);
        assert!(coqtop.calls()[1].contains(r#"<string>Check nat.</string><state_id val="1"/>"#));
    }

    #[test]
    fn test_goals_before_init_target_is_returned() {
        let (engine, coqtop) = started();
        coqtop.reply(
            r#"<value val="fail"><state_id val="0"/><richpp><_>Anomaly</_></richpp></value>"#,
        );
        let response = engine.goals(|| {}).unwrap();
        assert!(response.is_err());
        assert_eq!(coqtop.calls().len(), 2);
        assert_eq!(engine.get_messages(), "Anomaly");
    }

    #[test]
    fn test_rewind_to_position() {
        let (engine, coqtop) = started();
        coqtop.reply(&add_ok(2));
        coqtop.reply(&add_ok(3));
        engine.advance("A.", Position::new(0, 2, 2)).unwrap();
        engine.advance("B.", Position::new(1, 2, 2)).unwrap();
        coqtop.reply(r#"<value val="good"><union val="in_l"><unit/></union></value>"#);
        let response = engine.rewind_to(0, 5).unwrap();
        assert!(response.unwrap().is_ok());
        assert_eq!(engine.active_count(), 2);
        assert!(coqtop.calls()[3].contains(r#"<state_id val="2"/>"#));
        assert_eq!(engine.rewind_to(3, 0).unwrap(), None);
    }

    #[test]
    fn test_kill_clears_everything() {
        let (engine, _coqtop) = started();
        engine.kill();
        assert!(!engine.is_running());
        assert_eq!(engine.active_count(), 0);
        assert!(engine.commands().is_empty());
        assert!(engine.session_id().is_none());
    }

    #[test]
    fn test_chunked_output_is_reassembled() {
        let coqtop = ScriptedCoqtop::new().with_chunk_size(3);
        coqtop.reply(ScriptedCoqtop::init_ok(1));
        coqtop.reply(&add_ok(7));
        let engine = Engine::new();
        engine.start(coqtop.channel()).unwrap();
        let response = engine.advance("Check α.", Position::new(0, 8, 9)).unwrap();
        assert!(response.is_ok());
        assert_eq!(engine.current_state_id(), Some(StateId(7)));
    }
}
