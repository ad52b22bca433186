//! XML wire codec for the coqtop IDE protocol.
//!
//! This module provides the [`Protocol`] struct with methods for:
//! - Encoding a call (`<call val="Add">...</call>`) into bytes
//! - Decoding the tagged values, responses, feedback and messages coqtop sends
//!
//! and [`StreamDecoder`], which turns the raw byte stream read from coqtop
//! into top-level elements. coqtop puts no delimiter between messages, so a
//! message is complete when the accumulated bytes parse.
//!
//! # Example
//!
//! ```
//! use coqtop_codes::{Protocol, Response, StateId, Value};
//! use coqtop_codes::protocol::calls;
//!
//! let bytes = Protocol::encode_call(calls::EDIT_AT, &Value::StateId(StateId(3)))?;
//! assert_eq!(bytes, br#"<call val="Edit_at"><state_id val="3"/></call>"#);
//!
//! let elements = coqtop_codes::xml::parse_fragment(r#"<value val="good"><unit/></value>"#)?;
//! let response = Protocol::decode_response(&elements[0])?;
//! assert_eq!(response, Response::ok(Value::Unit));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{DecodeError, Result};
use crate::messages::{
    DiagnosticMessage, Failure, Feedback, FeedbackContent, FeedbackTarget, Incoming,
    MessageLevel, Response, Span,
};
use crate::types::{EditId, Either, Goal, Goals, OptionState, StateId, Status, Value};
use crate::xml::{escape_entities, parse_fragment, Element};
use log::{debug, warn};

/// Call names understood by coqtop.
pub mod calls {
    pub const INIT: &str = "Init";
    pub const ADD: &str = "Add";
    pub const EDIT_AT: &str = "Edit_at";
    pub const QUERY: &str = "Query";
    pub const GOAL: &str = "Goal";
}

/// Message text used when a failure carries no `richpp` payload.
pub const UNKNOWN_ERROR: &str = "Err: unknown";

/// Tags the value decoder recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Unit,
    Bool,
    String,
    Int,
    EditId,
    StateId,
    List,
    Option,
    Pair,
    Union,
    OptionState,
    OptionValue,
    Status,
    Goals,
    Goal,
    Evar,
    RichText,
}

impl Tag {
    fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "unit" => Tag::Unit,
            "bool" => Tag::Bool,
            "string" => Tag::String,
            "int" => Tag::Int,
            "edit_id" => Tag::EditId,
            "state_id" => Tag::StateId,
            "list" => Tag::List,
            "option" => Tag::Option,
            "pair" => Tag::Pair,
            "union" => Tag::Union,
            "option_state" => Tag::OptionState,
            "option_value" => Tag::OptionValue,
            "status" => Tag::Status,
            "goals" => Tag::Goals,
            "goal" => Tag::Goal,
            "evar" => Tag::Evar,
            "xml" | "richpp" => Tag::RichText,
            _ => return None,
        })
    }
}

/// Protocol handler for the coqtop XML protocol
pub struct Protocol;

impl Protocol {
    /// Encode `<call val="name">arg</call>` as UTF-8 bytes.
    pub fn encode_call(name: &str, arg: &Value) -> Result<Vec<u8>> {
        Element::new("call")
            .with_attr("val", name)
            .with_child(Self::encode_value(arg))
            .to_bytes()
    }

    /// Build the element tree for a value.
    pub fn encode_value(value: &Value) -> Element {
        match value {
            Value::Unit => Element::new("unit"),
            Value::Bool(b) => {
                Element::new("bool").with_attr("val", if *b { "true" } else { "false" })
            }
            Value::Str(s) => {
                let element = Element::new("string");
                if s.is_empty() {
                    element
                } else {
                    element.with_text(s.as_str())
                }
            }
            Value::Int(i) => Element::new("int").with_text(i.to_string()),
            Value::EditId(id) => Element::new("edit_id").with_attr("val", id.0.to_string()),
            Value::StateId(id) => Element::new("state_id").with_attr("val", id.0.to_string()),
            Value::List(items) => {
                Element::new("list").with_children(items.iter().map(Self::encode_value))
            }
            Value::Option(None) => Element::new("option").with_attr("val", "none"),
            Value::Option(Some(v)) => Element::new("option")
                .with_attr("val", "some")
                .with_child(Self::encode_value(v)),
            Value::Pair(a, b) => Element::new("pair")
                .with_child(Self::encode_value(a))
                .with_child(Self::encode_value(b)),
            Value::Either(Either::Left(v)) => Element::new("union")
                .with_attr("val", "in_l")
                .with_child(Self::encode_value(v)),
            Value::Either(Either::Right(v)) => Element::new("union")
                .with_attr("val", "in_r")
                .with_child(Self::encode_value(v)),
            Value::OptionState(state) => Element::new("option_state").with_children([
                Self::encode_value(&Value::Bool(state.sync)),
                Self::encode_value(&Value::Bool(state.deprecated)),
                Self::encode_value(&Value::Str(state.name.clone())),
                Self::encode_value(&state.value),
            ]),
            Value::OptionValue(inner) => Element::new("option_value")
                .with_attr("val", option_value_kind(inner))
                .with_child(Self::encode_value(inner)),
            Value::Status(status) => Element::new("status").with_children([
                encode_strings(&status.path),
                Self::encode_value(&match &status.proofname {
                    Some(name) => Value::some(Value::Str(name.clone())),
                    None => Value::none(),
                }),
                encode_strings(&status.allproofs),
                Self::encode_value(&Value::Int(status.proofnum)),
            ]),
            Value::Goals(goals) => Element::new("goals").with_children([
                encode_goal_list(&goals.fg),
                Element::new("list").with_children(goals.bg.iter().map(|(before, after)| {
                    Element::new("pair")
                        .with_child(encode_goal_list(before))
                        .with_child(encode_goal_list(after))
                })),
                encode_goal_list(&goals.shelved),
                encode_goal_list(&goals.given_up),
            ]),
            Value::Goal(goal) => encode_goal(goal),
            Value::Evar(info) => {
                Element::new("evar").with_child(Self::encode_value(&Value::Str(info.clone())))
            }
        }
    }

    /// Decode a value element.
    pub fn decode_value(xml: &Element) -> std::result::Result<Value, DecodeError> {
        let tag = Tag::parse(&xml.tag).ok_or_else(|| DecodeError::UnknownTag(xml.tag.clone()))?;
        match tag {
            Tag::Unit => Ok(Value::Unit),
            Tag::Bool => match required_attr(xml, "val")? {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(unexpected_attr(xml, "val", other)),
            },
            Tag::String => Ok(Value::Str(xml.own_text())),
            Tag::Int => {
                let text = xml.own_text();
                let n = parse_int(&xml.tag, text.trim())?;
                Ok(Value::Int(n))
            }
            Tag::EditId => Ok(Value::EditId(EditId(parse_int(
                &xml.tag,
                required_attr(xml, "val")?,
            )?))),
            Tag::StateId => Ok(Value::StateId(StateId(parse_int(
                &xml.tag,
                required_attr(xml, "val")?,
            )?))),
            Tag::List => Ok(Value::List(
                xml.children()
                    .map(Self::decode_value)
                    .collect::<std::result::Result<_, _>>()?,
            )),
            Tag::Option => match required_attr(xml, "val")? {
                "none" => Ok(Value::none()),
                "some" => {
                    let [inner] = fixed_children::<1>(xml)?;
                    Ok(Value::some(Self::decode_value(inner)?))
                }
                other => Err(unexpected_attr(xml, "val", other)),
            },
            Tag::Pair => {
                // An empty tuple is how coqtop spells unit in a few places.
                if xml.child_count() == 0 {
                    return Ok(Value::Unit);
                }
                let [a, b] = fixed_children::<2>(xml)?;
                Ok(Value::pair(Self::decode_value(a)?, Self::decode_value(b)?))
            }
            Tag::Union => {
                let side = required_attr(xml, "val")?;
                let [inner] = fixed_children::<1>(xml)?;
                let inner = Box::new(Self::decode_value(inner)?);
                match side {
                    "in_l" => Ok(Value::Either(Either::Left(inner))),
                    "in_r" => Ok(Value::Either(Either::Right(inner))),
                    other => Err(unexpected_attr(xml, "val", other)),
                }
            }
            Tag::OptionState => {
                let [sync, deprecated, name, value] = decode_children::<4>(xml)?;
                Ok(Value::OptionState(OptionState {
                    sync: sync.into_bool()?,
                    deprecated: deprecated.into_bool()?,
                    name: name.into_string()?,
                    value: Box::new(value),
                }))
            }
            Tag::OptionValue => {
                let [inner] = decode_children::<1>(xml)?;
                Ok(Value::OptionValue(Box::new(inner)))
            }
            Tag::Status => {
                let [path, proofname, allproofs, proofnum] = decode_children::<4>(xml)?;
                Ok(Value::Status(Status {
                    path: path.into_string_list()?,
                    proofname: proofname.into_option()?.map(Value::into_string).transpose()?,
                    allproofs: allproofs.into_string_list()?,
                    proofnum: proofnum.into_int()?,
                }))
            }
            Tag::Goals => {
                let [fg, bg, shelved, given_up] = decode_children::<4>(xml)?;
                let bg = bg
                    .into_list()?
                    .into_iter()
                    .map(|zipper| {
                        let (before, after) = zipper.into_pair()?;
                        Ok((before.into_goal_list()?, after.into_goal_list()?))
                    })
                    .collect::<std::result::Result<_, DecodeError>>()?;
                Ok(Value::Goals(Goals {
                    fg: fg.into_goal_list()?,
                    bg,
                    shelved: shelved.into_goal_list()?,
                    given_up: given_up.into_goal_list()?,
                }))
            }
            Tag::Goal => {
                let [id, hyp, ccl] = decode_children::<3>(xml)?;
                Ok(Value::Goal(Goal {
                    id: id.into_string()?,
                    hyp: hyp.into_string_list()?,
                    ccl: ccl.into_string()?,
                }))
            }
            Tag::Evar => {
                let [info] = decode_children::<1>(xml)?;
                Ok(Value::Evar(info.into_string()?))
            }
            Tag::RichText => Ok(Value::Str(xml.text_content())),
        }
    }

    /// Decode a `<value>` element into a [`Response`].
    pub fn decode_response(xml: &Element) -> std::result::Result<Response, DecodeError> {
        expect_tag(xml, "value")?;
        match required_attr(xml, "val")? {
            "good" => {
                let [payload] = fixed_children::<1>(xml)?;
                Ok(Response::ok(Self::decode_value(payload)?))
            }
            "fail" => Self::decode_failure(xml).map(Response::Err),
            other => Err(unexpected_attr(xml, "val", other)),
        }
    }

    fn decode_failure(xml: &Element) -> std::result::Result<Failure, DecodeError> {
        let message = match xml.find("richpp") {
            Some(richpp) => richpp.text_content().trim().to_string(),
            None => {
                let text = xml.own_text();
                if text.trim().is_empty() {
                    UNKNOWN_ERROR.to_string()
                } else {
                    text.trim().to_string()
                }
            }
        };

        let revert_to = match xml.find("state_id") {
            Some(state) => Some(Self::decode_value(state)?.into_state_id()?),
            None => None,
        };

        let loc = match (xml.attr("loc_s"), xml.attr("loc_e")) {
            (Some(start), Some(end)) => Some(Span {
                start: parse_offset("value", start)?,
                end: parse_offset("value", end)?,
            }),
            _ => None,
        };

        Ok(Failure {
            message,
            revert_to,
            loc,
            process_died: false,
        })
    }

    /// Decode a `<message>` element.
    pub fn decode_message(xml: &Element) -> std::result::Result<DiagnosticMessage, DecodeError> {
        expect_tag(xml, "message")?;
        let level = xml
            .find("message_level")
            .ok_or_else(|| DecodeError::MissingChild {
                tag: xml.tag.clone(),
                child: "message_level",
            })?;
        let level_name = required_attr(level, "val")?;
        let level = MessageLevel::from_wire(level_name)
            .ok_or_else(|| unexpected_attr(level, "val", level_name))?;

        let loc = match xml.find("option") {
            Some(option) if option.attr("val") == Some("some") => {
                let loc = option.find("loc").ok_or_else(|| DecodeError::MissingChild {
                    tag: option.tag.clone(),
                    child: "loc",
                })?;
                Some(Span {
                    start: parse_offset(&loc.tag, required_attr(loc, "start")?)?,
                    end: parse_offset(&loc.tag, required_attr(loc, "stop")?)?,
                })
            }
            _ => None,
        };

        // The text is the last child: `richpp` in current protocol versions,
        // `string` in older ones.
        let text = match xml.children().last() {
            Some(body) if body.tag != "message_level" && body.tag != "option" => {
                Self::decode_value(body)?.into_string()?
            }
            _ => String::new(),
        };

        Ok(DiagnosticMessage { level, loc, text })
    }

    /// Decode a `<feedback>` element.
    pub fn decode_feedback(xml: &Element) -> std::result::Result<Feedback, DecodeError> {
        expect_tag(xml, "feedback")?;
        let target = if xml.attr("object") == Some("state") {
            let id = xml.find("state_id").ok_or_else(|| DecodeError::MissingChild {
                tag: xml.tag.clone(),
                child: "state_id",
            })?;
            FeedbackTarget::State(Self::decode_value(id)?.into_state_id()?)
        } else {
            let id = xml.find("edit_id").ok_or_else(|| DecodeError::MissingChild {
                tag: xml.tag.clone(),
                child: "edit_id",
            })?;
            match Self::decode_value(id)? {
                Value::EditId(id) => FeedbackTarget::Edit(id),
                other => {
                    return Err(DecodeError::UnexpectedShape {
                        expected: "edit_id",
                        found: other.kind().to_string(),
                    })
                }
            }
        };

        let route = match xml.attr("route") {
            Some(route) => Some(parse_int(&xml.tag, route)?),
            None => None,
        };

        let content = xml
            .find("feedback_content")
            .ok_or_else(|| DecodeError::MissingChild {
                tag: xml.tag.clone(),
                child: "feedback_content",
            })?;
        let content = match required_attr(content, "val")? {
            "processed" => FeedbackContent::Processed,
            "processingin" => {
                let [worker] = decode_children::<1>(content)?;
                FeedbackContent::ProcessingIn {
                    worker: worker.into_string()?,
                }
            }
            "workerstatus" => {
                let [pair] = decode_children::<1>(content)?;
                let (worker, status) = pair.into_pair()?;
                FeedbackContent::WorkerStatus {
                    worker: worker.into_string()?,
                    status: status.into_string()?,
                }
            }
            "message" => {
                let message = content.find("message").ok_or_else(|| DecodeError::MissingChild {
                    tag: content.tag.clone(),
                    child: "message",
                })?;
                FeedbackContent::Message(Self::decode_message(message)?)
            }
            other => FeedbackContent::Other {
                kind: other.to_string(),
            },
        };

        Ok(Feedback {
            target,
            route,
            content,
        })
    }

    /// Decode any top-level element. Unknown elements yield `None`.
    pub fn decode_incoming(xml: &Element) -> std::result::Result<Option<Incoming>, DecodeError> {
        match xml.tag.as_str() {
            "value" => Self::decode_response(xml).map(|r| Some(Incoming::Value(r))),
            "message" => Self::decode_message(xml).map(|m| Some(Incoming::Message(m))),
            "feedback" => Self::decode_feedback(xml).map(|f| Some(Incoming::Feedback(f))),
            other => {
                warn!("[DECODE] Ignoring unexpected top-level <{}>", other);
                Ok(None)
            }
        }
    }
}

/// Accumulates coqtop output until it forms complete XML elements.
///
/// ```text
/// Accumulating(bytes) -> try_parse -> NeedMore | Parsed(elements)
/// ```
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

/// Outcome of [`StreamDecoder::try_parse`].
#[derive(Debug)]
pub enum Decoded {
    /// The bytes seen so far do not form complete elements yet.
    NeedMore,
    /// Complete top-level elements, in arrival order.
    Parsed(Vec<Element>),
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Try to parse everything accumulated so far.
    ///
    /// On success the accumulator keeps only a trailing partial UTF-8
    /// sequence, if any.
    pub fn try_parse(&mut self) -> Decoded {
        let (text, consumed) = escape_entities(&self.pending);
        if text.trim().is_empty() {
            return Decoded::NeedMore;
        }
        match parse_fragment(&text) {
            Ok(elements) => {
                self.pending.drain(..consumed);
                Decoded::Parsed(elements)
            }
            Err(e) => {
                debug!("[DECODE] Waiting for more data ({})", e);
                Decoded::NeedMore
            }
        }
    }
}

fn option_value_kind(inner: &Value) -> &'static str {
    match inner {
        Value::Bool(_) => "boolvalue",
        Value::Str(_) => "stringvalue",
        Value::Option(Some(v)) if matches!(**v, Value::Str(_)) => "stringoptvalue",
        _ => "intvalue",
    }
}

fn encode_strings(items: &[String]) -> Element {
    Element::new("list").with_children(
        items
            .iter()
            .map(|s| Protocol::encode_value(&Value::Str(s.clone()))),
    )
}

fn encode_goal(goal: &Goal) -> Element {
    Element::new("goal").with_children([
        Protocol::encode_value(&Value::Str(goal.id.clone())),
        encode_strings(&goal.hyp),
        Protocol::encode_value(&Value::Str(goal.ccl.clone())),
    ])
}

fn encode_goal_list(goals: &[Goal]) -> Element {
    Element::new("list").with_children(goals.iter().map(encode_goal))
}

fn expect_tag(xml: &Element, tag: &'static str) -> std::result::Result<(), DecodeError> {
    if xml.tag == tag {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedShape {
            expected: tag,
            found: xml.tag.clone(),
        })
    }
}

fn required_attr<'a>(
    xml: &'a Element,
    attr: &'static str,
) -> std::result::Result<&'a str, DecodeError> {
    xml.attr(attr).ok_or_else(|| DecodeError::MissingAttribute {
        tag: xml.tag.clone(),
        attr,
    })
}

fn unexpected_attr(xml: &Element, attr: &'static str, value: &str) -> DecodeError {
    DecodeError::UnexpectedAttribute {
        tag: xml.tag.clone(),
        attr,
        value: value.to_string(),
    }
}

fn parse_int(tag: &str, text: &str) -> std::result::Result<i64, DecodeError> {
    text.parse().map_err(|_| DecodeError::InvalidInt {
        tag: tag.to_string(),
        text: text.to_string(),
    })
}

fn parse_offset(tag: &str, text: &str) -> std::result::Result<usize, DecodeError> {
    text.parse().map_err(|_| DecodeError::InvalidInt {
        tag: tag.to_string(),
        text: text.to_string(),
    })
}

fn fixed_children<const N: usize>(
    xml: &Element,
) -> std::result::Result<[&Element; N], DecodeError> {
    let children: Vec<&Element> = xml.children().collect();
    let found = children.len();
    children.try_into().map_err(|_| DecodeError::Arity {
        tag: xml.tag.clone(),
        expected: N,
        found,
    })
}

fn decode_children<const N: usize>(xml: &Element) -> std::result::Result<[Value; N], DecodeError> {
    let children = fixed_children::<N>(xml)?;
    let values = children
        .into_iter()
        .map(Protocol::decode_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    values.try_into().map_err(|_| DecodeError::Arity {
        tag: xml.tag.clone(),
        expected: N,
        found: N,
    })
}
