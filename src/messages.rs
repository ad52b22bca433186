//! Decoded protocol messages: call responses, feedback and diagnostics

use crate::types::{EditId, StateId, Value};
use serde::{Deserialize, Serialize};

/// Message of the synthetic failure returned when coqtop goes away.
pub const PROCESS_DIED_MESSAGE: &str = "coqtop died";

/// Byte offsets `[start, end)` into the text of the command that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A rejected call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    /// State coqtop suggests rewinding to.
    pub revert_to: Option<StateId>,
    pub loc: Option<Span>,
    /// Set on the synthetic failure produced when the subprocess died.
    pub process_died: bool,
}

impl Failure {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            revert_to: None,
            loc: None,
            process_died: false,
        }
    }

    pub fn process_died() -> Self {
        Self {
            message: PROCESS_DIED_MESSAGE.to_string(),
            revert_to: Some(StateId::BEFORE_INIT),
            loc: None,
            process_died: true,
        }
    }
}

/// Answer to a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        value: Value,
        /// Diagnostic text that arrived alongside the value.
        message: Option<String>,
    },
    Err(Failure),
}

impl Response {
    pub fn ok(value: Value) -> Self {
        Response::Ok {
            value,
            message: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Response::Err(f) => Some(f),
            Response::Ok { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Response::Ok { value, .. } => Some(value),
            Response::Err(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Response::Ok { value, .. } => Some(value),
            Response::Err(_) => None,
        }
    }

    /// True for the synthetic response produced when coqtop died.
    pub fn process_died(&self) -> bool {
        matches!(self, Response::Err(f) if f.process_died)
    }
}

/// Severity coqtop attaches to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl MessageLevel {
    pub fn from_wire(level: &str) -> Option<Self> {
        match level {
            "debug" => Some(MessageLevel::Debug),
            "info" => Some(MessageLevel::Info),
            "notice" => Some(MessageLevel::Notice),
            "warning" => Some(MessageLevel::Warning),
            "error" => Some(MessageLevel::Error),
            _ => None,
        }
    }
}

/// A message, either standalone or carried by a feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub level: MessageLevel,
    pub loc: Option<Span>,
    pub text: String,
}

/// What a feedback refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTarget {
    State(StateId),
    Edit(EditId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackContent {
    Processed,
    ProcessingIn { worker: String },
    WorkerStatus { worker: String, status: String },
    Message(DiagnosticMessage),
    /// Any feedback kind the engine does not act on.
    Other { kind: String },
}

/// Out-of-band notification about a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub target: FeedbackTarget,
    pub route: Option<i64>,
    pub content: FeedbackContent,
}

/// A top-level element read from coqtop's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Value(Response),
    Message(DiagnosticMessage),
    Feedback(Feedback),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_died_failure() {
        let response = Response::Err(Failure::process_died());
        assert!(response.process_died());
        let failure = response.failure().unwrap();
        assert_eq!(failure.message, PROCESS_DIED_MESSAGE);
        assert_eq!(failure.revert_to, Some(StateId::BEFORE_INIT));
        assert!(failure.loc.is_none());
    }

    #[test]
    fn test_rejection_is_not_death() {
        let response = Response::Err(Failure::new("Syntax error"));
        assert!(response.is_err());
        assert!(!response.process_died());
    }

    #[test]
    fn test_message_level_from_wire() {
        assert_eq!(MessageLevel::from_wire("warning"), Some(MessageLevel::Warning));
        assert_eq!(MessageLevel::from_wire("error"), Some(MessageLevel::Error));
        assert_eq!(MessageLevel::from_wire("loud"), None);
    }

    #[test]
    fn test_response_serializes_with_status_tag() {
        let json = serde_json::to_value(Response::ok(Value::Unit)).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn test_feedback_content_serde_round_trip() {
        let contents = vec![
            FeedbackContent::Other {
                kind: "filedependency".to_string(),
            },
            FeedbackContent::WorkerStatus {
                worker: "proofworker:0".to_string(),
                status: "Dead".to_string(),
            },
            FeedbackContent::Message(DiagnosticMessage {
                level: MessageLevel::Warning,
                loc: Some(Span { start: 1, end: 4 }),
                text: "Notation overridden".to_string(),
            }),
        ];
        for content in contents {
            let feedback = Feedback {
                target: FeedbackTarget::Edit(EditId(-2)),
                route: Some(0),
                content,
            };
            let json = serde_json::to_string(&feedback).unwrap();
            let back: Feedback = serde_json::from_str(&json).unwrap();
            assert_eq!(back, feedback);
        }

        let json = serde_json::to_value(FeedbackContent::Other {
            kind: "filedependency".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "other");
        assert_eq!(json["kind"], "filedependency");
    }
}
