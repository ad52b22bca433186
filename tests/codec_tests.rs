//! Wire codec tests against payloads captured from coqtop 8.6.

use coqtop_codes::xml::parse_fragment;
use coqtop_codes::{
    Decoded, DecodeError, Either, FeedbackContent, FeedbackTarget, Goal, Goals, Incoming,
    MessageLevel, OptionState, Protocol, Response, Span, StateId, Status, StreamDecoder, Value,
};

fn decode_one(xml: &str) -> Incoming {
    let elements = parse_fragment(xml).expect("fixture should be well formed");
    assert_eq!(elements.len(), 1);
    Protocol::decode_incoming(&elements[0])
        .expect("fixture should decode")
        .expect("fixture should be a known element")
}

fn round_trip(value: &Value) -> Value {
    let bytes = Protocol::encode_value(value).to_bytes().unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let elements = parse_fragment(&text).unwrap();
    Protocol::decode_value(&elements[0]).unwrap()
}

#[test]
fn test_goal_response_with_hypotheses() {
    let incoming = decode_one(concat!(
        r#"<value val="good"><option val="some"><goals>"#,
        r#"<list><goal><string>3</string><list><richpp><_><pp.variable>n</pp.variable> : nat</_></richpp></list>"#,
        r#"<richpp><_>n + 0 = n</_></richpp></goal></list>"#,
        r#"<list><pair><list/><list><goal><string>4</string><list/><string>True</string></goal></list></pair></list>"#,
        r#"<list/><list/></goals></option></value>"#
    ));
    let Incoming::Value(response) = incoming else {
        panic!("expected a value");
    };
    let goals = response.into_value().unwrap().into_goals().unwrap().unwrap();
    assert_eq!(
        goals.fg,
        vec![Goal {
            id: "3".to_string(),
            hyp: vec!["n : nat".to_string()],
            ccl: "n + 0 = n".to_string(),
        }]
    );
    assert_eq!(goals.bg.len(), 1);
    assert!(goals.bg[0].0.is_empty());
    assert_eq!(goals.bg[0].1[0].ccl, "True");
    assert!(goals.shelved.is_empty());
}

#[test]
fn test_fail_response_fields() {
    let incoming = decode_one(
        r#"<value val="fail" loc_s="12" loc_e="15"><state_id val="4"/><richpp><_>The reference <pp.id>foo</pp.id> was not found.</_></richpp></value>"#,
    );
    let Incoming::Value(Response::Err(failure)) = incoming else {
        panic!("expected a failure");
    };
    assert_eq!(failure.message, "The reference foo was not found.");
    assert_eq!(failure.revert_to, Some(StateId(4)));
    assert_eq!(failure.loc, Some(Span { start: 12, end: 15 }));
    assert!(!failure.process_died);
}

#[test]
fn test_fail_response_without_text() {
    let incoming = decode_one(r#"<value val="fail"><state_id val="0"/></value>"#);
    let Incoming::Value(Response::Err(failure)) = incoming else {
        panic!("expected a failure");
    };
    assert_eq!(failure.message, "Err: unknown");
    assert_eq!(failure.loc, None);
}

#[test]
fn test_worker_status_feedback() {
    let incoming = decode_one(
        r#"<feedback object="state" route="0"><state_id val="1"/><feedback_content val="workerstatus"><pair><string>proofworker:0</string><string>Idle</string></pair></feedback_content></feedback>"#,
    );
    let Incoming::Feedback(feedback) = incoming else {
        panic!("expected feedback");
    };
    assert_eq!(feedback.target, FeedbackTarget::State(StateId(1)));
    assert_eq!(feedback.route, Some(0));
    assert_eq!(
        feedback.content,
        FeedbackContent::WorkerStatus {
            worker: "proofworker:0".to_string(),
            status: "Idle".to_string(),
        }
    );
}

#[test]
fn test_unhandled_feedback_kind() {
    let incoming = decode_one(
        r#"<feedback object="state" route="0"><state_id val="5"/><feedback_content val="filedependency"><option val="none"/><string>Coq.Init.Prelude</string></feedback_content></feedback>"#,
    );
    let Incoming::Feedback(feedback) = incoming else {
        panic!("expected feedback");
    };
    assert_eq!(
        feedback.content,
        FeedbackContent::Other {
            kind: "filedependency".to_string()
        }
    );
}

#[test]
fn test_standalone_message() {
    let incoming = decode_one(
        r#"<message><message_level val="warning"/><option val="some"><loc start="0" stop="7"/></option><richpp><_>Notation overridden</_></richpp></message>"#,
    );
    let Incoming::Message(message) = incoming else {
        panic!("expected a message");
    };
    assert_eq!(message.level, MessageLevel::Warning);
    assert_eq!(message.loc, Some(Span { start: 0, end: 7 }));
    assert_eq!(message.text, "Notation overridden");
}

#[test]
fn test_unknown_top_level_element_is_skipped() {
    let elements = parse_fragment("<ping/>").unwrap();
    assert_eq!(Protocol::decode_incoming(&elements[0]).unwrap(), None);
}

#[test]
fn test_bad_bool_is_rejected() {
    let elements = parse_fragment(r#"<bool val="maybe"/>"#).unwrap();
    assert!(matches!(
        Protocol::decode_value(&elements[0]),
        Err(DecodeError::UnexpectedAttribute { .. })
    ));
}

#[test]
fn test_composite_arity_is_checked() {
    let elements = parse_fragment("<goal><string>1</string><list/></goal>").unwrap();
    assert!(matches!(
        Protocol::decode_value(&elements[0]),
        Err(DecodeError::Arity {
            expected: 3,
            found: 2,
            ..
        })
    ));
}

#[test]
fn test_unknown_value_tag() {
    let elements = parse_fragment("<float>1.0</float>").unwrap();
    assert_eq!(
        Protocol::decode_value(&elements[0]),
        Err(DecodeError::UnknownTag("float".to_string()))
    );
}

#[test]
fn test_empty_pair_is_unit() {
    let elements = parse_fragment("<pair/>").unwrap();
    assert_eq!(Protocol::decode_value(&elements[0]).unwrap(), Value::Unit);
}

#[test]
fn test_stream_decoder_reassembles_chunks_and_entities() {
    let raw = "<feedback object=\"edit\" route=\"0\"><edit_id val=\"-3\"/><feedback_content val=\"processed\"/></feedback>\
               <value val=\"good\"><string>fun&nbsp;x&nbsp;=&gt;&nbsp;x&#40;&apos;&#41; →</string></value>";
    let bytes = raw.as_bytes();
    let mut decoder = StreamDecoder::new();
    let mut parsed = Vec::new();
    for chunk in bytes.chunks(7) {
        decoder.push(chunk);
        if let Decoded::Parsed(elements) = decoder.try_parse() {
            parsed.extend(elements);
        }
    }
    assert!(decoder.is_empty());
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].tag, "feedback");
    let response = Protocol::decode_response(&parsed[1]).unwrap();
    assert_eq!(response, Response::ok(Value::str("fun x => x(') →")));
}

#[test]
fn test_stream_decoder_escapes_invalid_utf8() {
    let mut decoder = StreamDecoder::new();
    decoder.push(b"<value val=\"good\"><string>a\xffb</string></value>");
    let Decoded::Parsed(elements) = decoder.try_parse() else {
        panic!("should parse");
    };
    let response = Protocol::decode_response(&elements[0]).unwrap();
    assert_eq!(response, Response::ok(Value::str("a\u{ff}b")));
}

#[test]
fn test_encode_add_call() {
    let arg = Value::pair(
        Value::pair(Value::str("Check 1 < 2."), Value::Int(-4)),
        Value::pair(Value::StateId(StateId(7)), Value::Bool(true)),
    );
    let bytes = Protocol::encode_call("Add", &arg).unwrap();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        concat!(
            r#"<call val="Add"><pair><pair><string>Check 1 &lt; 2.</string><int>-4</int></pair>"#,
            r#"<pair><state_id val="7"/><bool val="true"/></pair></pair></call>"#
        )
    );
}

#[test]
fn test_round_trip_representative_values() {
    let goal = Goal {
        id: "2".to_string(),
        hyp: vec!["H : a = b".to_string(), "x : nat".to_string()],
        ccl: "b = a".to_string(),
    };
    let values = vec![
        Value::Unit,
        Value::Bool(false),
        Value::str("Lemma α : ∀ x, x = x."),
        Value::str(""),
        Value::Int(-42),
        Value::StateId(StateId(12)),
        Value::List(vec![Value::Int(1), Value::str("two")]),
        Value::none(),
        Value::some(Value::pair(Value::Unit, Value::Bool(true))),
        Value::Either(Either::Right(Box::new(Value::StateId(StateId(3))))),
        Value::OptionState(OptionState {
            sync: true,
            deprecated: false,
            name: "Printing Width".to_string(),
            value: Box::new(Value::OptionValue(Box::new(Value::some(Value::Int(78))))),
        }),
        Value::OptionValue(Box::new(Value::str("utf8"))),
        Value::Status(Status {
            path: vec!["Top".to_string()],
            proofname: Some("foo".to_string()),
            allproofs: vec!["foo".to_string()],
            proofnum: 1,
        }),
        Value::Goals(Goals {
            fg: vec![goal.clone()],
            bg: vec![(vec![], vec![goal.clone()])],
            shelved: vec![],
            given_up: vec![goal.clone()],
        }),
        Value::Goal(goal),
        Value::Evar("?x".to_string()),
    ];
    for value in &values {
        assert_eq!(&round_trip(value), value, "round trip of {}", value.kind());
    }
}
