//! Applies coqtop's out-of-band notifications to the command log.
//!
//! coqtop may report on a command before it has answered the `Add` that
//! created it. A feedback naming an unknown edit, or a state newer than any
//! acknowledged so far, falls back to the newest live command that has no
//! state id yet. Feedback for a rewound state is dropped.

use crate::command::{CommandLog, CommandState, Severity};
use crate::diagnostics::MessageLog;
use crate::messages::{DiagnosticMessage, Feedback, FeedbackContent, FeedbackTarget, MessageLevel};
use log::{debug, info};

/// Worker status coqtop reports when a worker process is gone.
pub const WORKER_DEAD: &str = "Dead";

impl From<MessageLevel> for Severity {
    fn from(level: MessageLevel) -> Self {
        match level {
            MessageLevel::Error => Severity::Error,
            MessageLevel::Warning => Severity::Warning,
            MessageLevel::Debug | MessageLevel::Info | MessageLevel::Notice => Severity::None,
        }
    }
}

/// Borrowing view over the state feedback mutates.
pub struct FeedbackProcessor<'a> {
    log: &'a mut CommandLog,
    messages: &'a mut MessageLog,
}

impl<'a> FeedbackProcessor<'a> {
    pub fn new(log: &'a mut CommandLog, messages: &'a mut MessageLog) -> Self {
        Self { log, messages }
    }

    /// Apply one feedback. Returns whether anything observable changed.
    pub fn apply(&mut self, feedback: &Feedback) -> bool {
        let target = self.resolve(feedback.target);
        match &feedback.content {
            FeedbackContent::Processed => match target.and_then(|idx| self.log.get_mut(idx)) {
                Some(command) => command.mark_processed(),
                None => false,
            },
            FeedbackContent::ProcessingIn { worker } => {
                match target.and_then(|idx| self.log.get_mut(idx)) {
                    Some(command) => {
                        command.worker = Some(worker.clone());
                        true
                    }
                    None => false,
                }
            }
            FeedbackContent::WorkerStatus { worker, status } => {
                if status == WORKER_DEAD {
                    self.abandon_worker(worker)
                } else {
                    false
                }
            }
            FeedbackContent::Message(message) => {
                self.annotate(target, message);
                self.messages.push(message.text.clone());
                true
            }
            FeedbackContent::Other { kind } => {
                debug!("[FEEDBACK] Ignoring {} for {:?}", kind, feedback.target);
                false
            }
        }
    }

    /// Apply a standalone `<message>`: its text is always recorded and a
    /// warning is pinned to the newest unacknowledged command.
    pub fn apply_message(&mut self, message: &DiagnosticMessage) -> bool {
        if message.level == MessageLevel::Warning {
            let target = self.log.latest_unconfirmed();
            self.annotate(target, message);
        }
        self.messages.push(message.text.clone());
        true
    }

    fn resolve(&self, target: FeedbackTarget) -> Option<usize> {
        match target {
            FeedbackTarget::State(id) => self.log.active_index_of_state(id).or_else(|| {
                // A state newer than any acknowledged one belongs to an Add
                // still waiting for its answer; an older one is stale.
                if self.log.is_unseen_state(id) {
                    self.log.latest_unconfirmed()
                } else {
                    None
                }
            }),
            FeedbackTarget::Edit(id) => self
                .log
                .active_index_of_edit(id)
                .or_else(|| self.log.latest_unconfirmed()),
        }
    }

    fn annotate(&mut self, target: Option<usize>, message: &DiagnosticMessage) {
        let severity = Severity::from(message.level);
        if severity == Severity::None {
            return;
        }
        if let Some(command) = target.and_then(|idx| self.log.get_mut(idx)) {
            command.set_diagnostic(severity, message.loc);
            command.mark_processed();
        }
    }

    fn abandon_worker(&mut self, worker: &str) -> bool {
        let mut abandoned = 0;
        for command in self.log.active_mut() {
            if command.state == CommandState::Sent && command.worker.as_deref() == Some(worker) {
                command.state = CommandState::Abandoned;
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            info!(
                "[FEEDBACK] Worker {} died; abandoned {} command(s)",
                worker, abandoned
            );
        }
        abandoned > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Position;
    use crate::messages::Span;
    use crate::types::{EditId, StateId};

    fn setup() -> (CommandLog, MessageLog, EditId, EditId) {
        let mut log = CommandLog::new();
        log.reset(StateId(1));
        let a = log.push(Position::new(0, 5, 5));
        log.confirm(a, StateId(2));
        let b = log.push(Position::new(0, 9, 9));
        (log, MessageLog::new(), a, b)
    }

    fn feedback(target: FeedbackTarget, content: FeedbackContent) -> Feedback {
        Feedback {
            target,
            route: Some(0),
            content,
        }
    }

    #[test]
    fn test_processed_by_state_id() {
        let (mut log, mut messages, _, _) = setup();
        let changed = FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(2)),
            FeedbackContent::Processed,
        ));
        assert!(changed);
        assert_eq!(log.active()[1].state, CommandState::Processed);
        assert_eq!(log.active()[2].state, CommandState::Sent);
    }

    #[test]
    fn test_unknown_state_falls_back_to_pending_command() {
        let (mut log, mut messages, _, _) = setup();
        FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(3)),
            FeedbackContent::ProcessingIn {
                worker: "w1".to_string(),
            },
        ));
        assert_eq!(log.active()[2].worker.as_deref(), Some("w1"));
        assert_eq!(log.active()[2].state, CommandState::Sent);
    }

    #[test]
    fn test_edit_target() {
        let (mut log, mut messages, a, _) = setup();
        FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::Edit(a),
            FeedbackContent::ProcessingIn {
                worker: "proofworker:0".to_string(),
            },
        ));
        assert_eq!(log.active()[1].worker.as_deref(), Some("proofworker:0"));
    }

    #[test]
    fn test_error_message_annotates_and_records() {
        let (mut log, mut messages, _, _) = setup();
        let message = DiagnosticMessage {
            level: MessageLevel::Error,
            loc: Some(Span { start: 2, end: 4 }),
            text: "The reference x was not found".to_string(),
        };
        FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(2)),
            FeedbackContent::Message(message),
        ));
        let command = &log.active()[1];
        assert_eq!(command.msg_type, Severity::Error);
        assert_eq!(command.state, CommandState::Processed);
        assert_eq!(command.msg_offsets, Some(Span { start: 2, end: 4 }));
        assert_eq!(messages.joined(), "The reference x was not found");
    }

    #[test]
    fn test_info_message_only_records_text() {
        let (mut log, mut messages, _, _) = setup();
        let message = DiagnosticMessage {
            level: MessageLevel::Notice,
            loc: None,
            text: "foo is defined".to_string(),
        };
        FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(2)),
            FeedbackContent::Message(message),
        ));
        assert_eq!(log.active()[1].msg_type, Severity::None);
        assert_eq!(messages.entries(), ["foo is defined"]);
    }

    #[test]
    fn test_processed_does_not_revive_abandoned() {
        let (mut log, mut messages, _, _) = setup();
        log.active_mut()[1].state = CommandState::Abandoned;
        let changed = FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(2)),
            FeedbackContent::Processed,
        ));
        assert!(!changed);
        assert_eq!(log.active()[1].state, CommandState::Abandoned);
    }

    #[test]
    fn test_dead_worker_abandons_only_its_sent_commands() {
        let (mut log, mut messages, _, _) = setup();
        log.active_mut()[1].worker = Some("w1".to_string());
        log.active_mut()[2].worker = Some("w1".to_string());
        log.active_mut()[1].state = CommandState::Processed;
        let changed = FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(1)),
            FeedbackContent::WorkerStatus {
                worker: "w1".to_string(),
                status: WORKER_DEAD.to_string(),
            },
        ));
        assert!(changed);
        assert_eq!(log.active()[1].state, CommandState::Processed);
        assert_eq!(log.active()[2].state, CommandState::Abandoned);
    }

    #[test]
    fn test_idle_worker_status_is_ignored() {
        let (mut log, mut messages, _, _) = setup();
        log.active_mut()[2].worker = Some("w1".to_string());
        let changed = FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(1)),
            FeedbackContent::WorkerStatus {
                worker: "w1".to_string(),
                status: "Idle".to_string(),
            },
        ));
        assert!(!changed);
        assert_eq!(log.active()[2].state, CommandState::Sent);
    }

    #[test]
    fn test_standalone_warning_pins_to_pending_command() {
        let (mut log, mut messages, _, _) = setup();
        let message = DiagnosticMessage {
            level: MessageLevel::Warning,
            loc: None,
            text: "Deprecated".to_string(),
        };
        FeedbackProcessor::new(&mut log, &mut messages).apply_message(&message);
        assert_eq!(log.active()[2].msg_type, Severity::Warning);
        assert_eq!(log.active()[1].msg_type, Severity::None);
        assert_eq!(messages.joined(), "Deprecated");
    }

    #[test]
    fn test_stale_state_does_not_promote_pending_command() {
        let mut log = CommandLog::new();
        log.reset(StateId(1));
        for state in 2..=3 {
            let edit = log.push(Position::new(0, state as usize, state as usize));
            log.confirm(edit, StateId(state));
        }
        log.rewind(1, true).unwrap();
        log.push(Position::new(0, 9, 9));
        let mut messages = MessageLog::new();

        let changed = FeedbackProcessor::new(&mut log, &mut messages).apply(&feedback(
            FeedbackTarget::State(StateId(3)),
            FeedbackContent::Processed,
        ));
        assert!(!changed);
        assert_eq!(log.active()[2].state, CommandState::Sent);
    }
}
