//! Core value types exchanged with coqtop
//!
//! [`Value`] is the tagged-value algebra of the XML protocol. The composite
//! records ([`Goals`], [`Status`], ...) are positional on the wire and typed
//! here.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// Provisional id the client assigns to a command before coqtop acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EditId(pub i64);

/// Id coqtop assigns to a state once it accepts a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub i64);

impl StateId {
    /// The state before `Init`. Nothing can be rewound to it.
    pub const BEFORE_INIT: StateId = StateId(0);
}

impl std::fmt::Display for EditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A protocol value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Unit,
    Bool(bool),
    Str(String),
    Int(i64),
    EditId(EditId),
    StateId(StateId),
    List(Vec<Value>),
    Option(Option<Box<Value>>),
    Pair(Box<Value>, Box<Value>),
    Either(Either),
    OptionState(OptionState),
    OptionValue(Box<Value>),
    Status(Status),
    Goals(Goals),
    Goal(Goal),
    Evar(String),
}

/// `union` on the wire: `in_l` / `in_r`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Either {
    Left(Box<Value>),
    Right(Box<Value>),
}

/// State of a coqtop option (`option_state`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionState {
    pub sync: bool,
    pub deprecated: bool,
    pub name: String,
    pub value: Box<Value>,
}

/// Result of a `Status` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub path: Vec<String>,
    pub proofname: Option<String>,
    pub allproofs: Vec<String>,
    pub proofnum: i64,
}

/// A single goal: its id, hypotheses and conclusion, rendered as plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub hyp: Vec<String>,
    pub ccl: String,
}

/// Every goal known at the current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goals {
    pub fg: Vec<Goal>,
    pub bg: Vec<(Vec<Goal>, Vec<Goal>)>,
    pub shelved: Vec<Goal>,
    pub given_up: Vec<Goal>,
}

impl Value {
    pub fn str<S: Into<String>>(s: S) -> Self {
        Value::Str(s.into())
    }

    pub fn pair(a: Value, b: Value) -> Self {
        Value::Pair(Box::new(a), Box::new(b))
    }

    pub fn some(v: Value) -> Self {
        Value::Option(Some(Box::new(v)))
    }

    pub fn none() -> Self {
        Value::Option(None)
    }

    /// Short name of the variant, used in decode errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::EditId(_) => "edit_id",
            Value::StateId(_) => "state_id",
            Value::List(_) => "list",
            Value::Option(_) => "option",
            Value::Pair(..) => "pair",
            Value::Either(_) => "union",
            Value::OptionState(_) => "option_state",
            Value::OptionValue(_) => "option_value",
            Value::Status(_) => "status",
            Value::Goals(_) => "goals",
            Value::Goal(_) => "goal",
            Value::Evar(_) => "evar",
        }
    }

    fn shape_error(&self, expected: &'static str) -> DecodeError {
        DecodeError::UnexpectedShape {
            expected,
            found: self.kind().to_string(),
        }
    }

    pub fn into_bool(self) -> Result<bool, DecodeError> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(other.shape_error("bool")),
        }
    }

    pub fn into_string(self) -> Result<String, DecodeError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.shape_error("string")),
        }
    }

    pub fn into_int(self) -> Result<i64, DecodeError> {
        match self {
            Value::Int(i) => Ok(i),
            other => Err(other.shape_error("int")),
        }
    }

    pub fn into_state_id(self) -> Result<StateId, DecodeError> {
        match self {
            Value::StateId(id) => Ok(id),
            other => Err(other.shape_error("state_id")),
        }
    }

    pub fn into_list(self) -> Result<Vec<Value>, DecodeError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.shape_error("list")),
        }
    }

    pub fn into_option(self) -> Result<Option<Value>, DecodeError> {
        match self {
            Value::Option(v) => Ok(v.map(|b| *b)),
            other => Err(other.shape_error("option")),
        }
    }

    pub fn into_pair(self) -> Result<(Value, Value), DecodeError> {
        match self {
            Value::Pair(a, b) => Ok((*a, *b)),
            other => Err(other.shape_error("pair")),
        }
    }

    pub fn into_goal(self) -> Result<Goal, DecodeError> {
        match self {
            Value::Goal(g) => Ok(g),
            other => Err(other.shape_error("goal")),
        }
    }

    /// Unpacks the payload of a `Goal` call: `option(goals)`.
    pub fn into_goals(self) -> Result<Option<Goals>, DecodeError> {
        match self.into_option()? {
            None => Ok(None),
            Some(Value::Goals(g)) => Ok(Some(g)),
            Some(other) => Err(other.shape_error("goals")),
        }
    }

    pub fn into_string_list(self) -> Result<Vec<String>, DecodeError> {
        self.into_list()?
            .into_iter()
            .map(Value::into_string)
            .collect()
    }

    pub fn into_goal_list(self) -> Result<Vec<Goal>, DecodeError> {
        self.into_list()?.into_iter().map(Value::into_goal).collect()
    }
}

impl From<Goal> for Value {
    fn from(goal: Goal) -> Self {
        Value::Goal(goal)
    }
}

impl From<Vec<Goal>> for Value {
    fn from(goals: Vec<Goal>) -> Self {
        Value::List(goals.into_iter().map(Value::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_goals_none() {
        assert_eq!(Value::none().into_goals().unwrap(), None);
    }

    #[test]
    fn test_into_goals_some() {
        let goals = Goals {
            fg: vec![Goal {
                id: "1".to_string(),
                hyp: vec!["H : True".to_string()],
                ccl: "True".to_string(),
            }],
            ..Goals::default()
        };
        let value = Value::some(Value::Goals(goals.clone()));
        assert_eq!(value.into_goals().unwrap(), Some(goals));
    }

    #[test]
    fn test_shape_mismatch_names_kinds() {
        let err = Value::Int(3).into_string().unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedShape {
                expected: "string",
                found: "int".to_string()
            }
        );
    }

    #[test]
    fn test_value_serializes_tagged() {
        let json = serde_json::to_string(&Value::StateId(StateId(4))).unwrap();
        assert_eq!(json, r#"{"type":"state_id","value":4}"#);
    }
}
