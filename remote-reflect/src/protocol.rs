//! Remote value model and command codes.
//!
//! Everything that crosses the wire as an argument or a result is a
//! [`RemoteValue`]: a tag plus a string. Literals (strings, numbers) carry
//! their text; classes carry a type name; every other kind is a handle whose
//! string is an opaque key into the server's identity cache.

use serde::{Deserialize, Serialize};

use crate::wire::{Datum, Node};

/// Revision of the envelope layout and command table.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ValueKind {
    Null = 0,
    String = 1,
    Number = 2,
    Object = 3,
    Field = 4,
    Method = 5,
    Class = 6,
    Array = 7,
    Exception = 8,
    Reflector = 9,
}

impl ValueKind {
    pub const ALL: [ValueKind; 10] = [
        Self::Null,
        Self::String,
        Self::Number,
        Self::Object,
        Self::Field,
        Self::Method,
        Self::Class,
        Self::Array,
        Self::Exception,
        Self::Reflector,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Handles reference server-side state; everything below `Object` is a
    /// literal.
    pub fn is_handle(self) -> bool {
        self >= Self::Object
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Null => "NULL",
            Self::String => "STRING",
            Self::Number => "NUMBER",
            Self::Object => "OBJECT",
            Self::Field => "FIELD",
            Self::Method => "METHOD",
            Self::Class => "CLASS",
            Self::Array => "ARRAY",
            Self::Exception => "EXCEPTION",
            Self::Reflector => "REFLECTOR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("expected a {expected} handle, got nothing")]
    Missing { expected: ValueKind },

    #[error("expected a {expected} handle, got {found}")]
    WrongKind {
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("expected a handle, got {0}")]
    NotAHandle(ValueKind),

    #[error("malformed remote value: {0}")]
    Malformed(String),
}

/// A tagged value or handle as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteValue {
    pub kind: ValueKind,
    pub value_id: String,
}

impl RemoteValue {
    pub fn new(kind: ValueKind, value_id: impl Into<String>) -> Self {
        Self {
            kind,
            value_id: value_id.into(),
        }
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null, "")
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(ValueKind::String, s)
    }

    pub fn number(n: f64) -> Self {
        Self::new(ValueKind::Number, n.to_string())
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(ValueKind::Class, name)
    }

    pub fn is_null(&self) -> bool {
        self.kind == ValueKind::Null
    }

    pub fn is_object(&self) -> bool {
        self.kind.is_handle()
    }

    pub fn is_exception(&self) -> bool {
        self.kind == ValueKind::Exception
    }

    /// Numeric value of a NUMBER literal.
    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Number => self.value_id.parse().ok(),
            _ => None,
        }
    }

    /// Text of a STRING literal.
    pub fn as_str(&self) -> Option<&str> {
        match self.kind {
            ValueKind::String => Some(&self.value_id),
            _ => None,
        }
    }

    /// Wire form: a node with `type` and `value` fields.
    pub fn to_node(&self) -> Node {
        Node::with_fields([
            ("type", Datum::Number(f64::from(self.kind.tag()))),
            ("value", Datum::Text(self.value_id.clone())),
        ])
    }

    pub fn to_datum(&self) -> Datum {
        Datum::Node(self.to_node())
    }

    pub fn from_node(node: &Node) -> Result<Self, ProtocolError> {
        let tag = node
            .get("type")
            .and_then(|d| d.as_number())
            .ok_or_else(|| ProtocolError::Malformed("missing numeric 'type'".to_string()))?;
        if tag < 0.0 || tag.fract() != 0.0 || tag > f64::from(u8::MAX) {
            return Err(ProtocolError::Malformed(format!("bad tag {tag}")));
        }
        let kind = ValueKind::from_tag(tag as u8)
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown tag {tag}")))?;
        let value_id = match node.get("value") {
            Some(Datum::Text(s)) => s,
            Some(Datum::Number(n)) => n.to_string(),
            None if kind == ValueKind::Null => String::new(),
            _ => return Err(ProtocolError::Malformed("missing 'value'".to_string())),
        };
        Ok(Self { kind, value_id })
    }

    pub fn from_datum(datum: &Datum) -> Result<Self, ProtocolError> {
        match datum {
            Datum::Node(node) => Self::from_node(node),
            other => Err(ProtocolError::Malformed(format!(
                "expected a handle node, got {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for RemoteValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.value_id)
    }
}

/// Fail unless `value` is present and tagged `kind`.
pub fn assert_type(
    value: Option<&RemoteValue>,
    kind: ValueKind,
) -> Result<&RemoteValue, ProtocolError> {
    match value {
        None => Err(ProtocolError::Missing { expected: kind }),
        Some(v) if v.kind != kind => Err(ProtocolError::WrongKind {
            expected: kind,
            found: v.kind,
        }),
        Some(v) => Ok(v),
    }
}

/// Fail unless `value` is present and is any handle kind.
pub fn assert_object(value: Option<&RemoteValue>) -> Result<&RemoteValue, ProtocolError> {
    match value {
        None => Err(ProtocolError::Missing {
            expected: ValueKind::Object,
        }),
        Some(v) if !v.is_object() => Err(ProtocolError::NotAHandle(v.kind)),
        Some(v) => Ok(v),
    }
}

/// Reflective operation selected by a request's base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Register = 0,
    Increase = 1,
    Decrease = 2,
    ForName = 3,
    NewInstance = 4,
    GetRemoteClass = 5,
    GetArrayElement = 6,
    GetArrayLength = 7,
    SetArrayElement = 8,
    GetField = 9,
    Get = 10,
    GetMethod = 11,
    Invoke = 12,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Self::Register,
        Self::Increase,
        Self::Decrease,
        Self::ForName,
        Self::NewInstance,
        Self::GetRemoteClass,
        Self::GetArrayElement,
        Self::GetArrayLength,
        Self::SetArrayElement,
        Self::GetField,
        Self::Get,
        Self::GetMethod,
        Self::Invoke,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Decode the number carried in a request's `base`.
    pub fn from_datum(datum: &Datum) -> Option<Self> {
        let n = datum.as_number()?;
        if n < 0.0 || n.fract() != 0.0 || n > f64::from(u8::MAX) {
            return None;
        }
        Self::from_code(n as u8)
    }

    pub fn to_datum(self) -> Datum {
        Datum::Number(f64::from(self.code()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::ForName => "for_name",
            Self::NewInstance => "new_instance",
            Self::GetRemoteClass => "get_remote_class",
            Self::GetArrayElement => "get_array_element",
            Self::GetArrayLength => "get_array_length",
            Self::SetArrayElement => "set_array_element",
            Self::GetField => "get_field",
            Self::Get => "get",
            Self::GetMethod => "get_method",
            Self::Invoke => "invoke",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_kinds_start_at_object() {
        let handles: Vec<_> = ValueKind::ALL
            .into_iter()
            .filter(|k| k.is_handle())
            .collect();
        assert_eq!(handles.first(), Some(&ValueKind::Object));
        assert_eq!(handles.len(), 7);
        assert!(!ValueKind::Number.is_handle());
    }

    #[test]
    fn tags_roundtrip() {
        for (i, kind) in ValueKind::ALL.into_iter().enumerate() {
            assert_eq!(kind.tag() as usize, i);
            assert_eq!(ValueKind::from_tag(i as u8), Some(kind));
        }
        assert_eq!(ValueKind::from_tag(10), None);
    }

    #[test]
    fn assert_type_rejects_every_other_tag() {
        for expected in ValueKind::ALL {
            for actual in ValueKind::ALL {
                let value = RemoteValue::new(actual, "1");
                let result = assert_type(Some(&value), expected);
                if actual == expected {
                    assert_eq!(result, Ok(&value));
                } else {
                    assert_eq!(
                        result,
                        Err(ProtocolError::WrongKind {
                            expected,
                            found: actual
                        })
                    );
                }
            }
            assert_eq!(
                assert_type(None, expected),
                Err(ProtocolError::Missing { expected })
            );
        }
    }

    #[test]
    fn assert_object_accepts_only_handles() {
        for kind in ValueKind::ALL {
            let value = RemoteValue::new(kind, "1");
            assert_eq!(assert_object(Some(&value)).is_ok(), kind.is_handle());
        }
        assert!(assert_object(None).is_err());
    }

    #[test]
    fn remote_value_node_form() {
        let value = RemoteValue::new(ValueKind::Object, "17");
        let node = value.to_node();
        assert_eq!(node.get("type").unwrap().as_number(), Some(3.0));
        assert_eq!(node.get("value").unwrap().as_text(), Some("17"));
        assert_eq!(RemoteValue::from_node(&node).unwrap(), value);
    }

    #[test]
    fn malformed_nodes_are_rejected() {
        let node = Node::with_fields([("type", Datum::Number(42.0)), ("value", "x".into())]);
        assert!(matches!(
            RemoteValue::from_node(&node),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(RemoteValue::from_node(&Node::new()).is_err());
        assert!(RemoteValue::from_datum(&Datum::from("x")).is_err());

        let null = Node::with_fields([("type", 0.0)]);
        assert_eq!(RemoteValue::from_node(&null).unwrap(), RemoteValue::null());
    }

    #[test]
    fn literal_accessors() {
        assert_eq!(RemoteValue::number(10.0).value_id, "10");
        assert_eq!(RemoteValue::number(10.0).as_number(), Some(10.0));
        assert_eq!(RemoteValue::string("hi").as_str(), Some("hi"));
        assert_eq!(RemoteValue::string("3").as_number(), None);
    }

    #[test]
    fn command_codes() {
        for (i, cmd) in Command::ALL.into_iter().enumerate() {
            assert_eq!(cmd.code() as usize, i);
            assert_eq!(Command::from_datum(&cmd.to_datum()), Some(cmd));
        }
        assert_eq!(Command::from_datum(&Datum::Number(13.0)), None);
        assert_eq!(Command::from_datum(&Datum::Number(1.5)), None);
        assert_eq!(Command::from_datum(&Datum::from("3")), None);
        assert_eq!(Command::Invoke.code(), 12);
    }
}
