//! Validated, ready-to-encode commands.
//!
//! Every constructor checks its handle arguments with [`assert_type`] /
//! [`assert_object`] so a wrongly tagged handle never reaches the network.

use crate::error::ReflectError;
use crate::protocol::{Command, ProtocolError, RemoteValue, ValueKind, assert_object, assert_type};
use crate::wire::{Datum, Node, SerializationContext, decode_response, encode_request};

#[derive(Debug, Clone)]
pub struct Call {
    command: Command,
    args: Vec<Datum>,
}

fn list(values: &[RemoteValue]) -> Datum {
    Datum::Node(Node::list(values.iter().map(RemoteValue::to_datum)))
}

impl Call {
    fn new(command: Command, args: Vec<Datum>) -> Self {
        Self { command, args }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn register() -> Self {
        Self::new(Command::Register, Vec::new())
    }

    pub fn increase(handles: &[RemoteValue]) -> Result<Self, ProtocolError> {
        Self::refcount(Command::Increase, handles)
    }

    pub fn decrease(handles: &[RemoteValue]) -> Result<Self, ProtocolError> {
        Self::refcount(Command::Decrease, handles)
    }

    fn refcount(command: Command, handles: &[RemoteValue]) -> Result<Self, ProtocolError> {
        if handles.is_empty() {
            return Err(ProtocolError::Missing {
                expected: ValueKind::Object,
            });
        }
        let args = handles
            .iter()
            .map(|h| assert_object(Some(h)).map(RemoteValue::to_datum))
            .collect::<Result<_, _>>()?;
        Ok(Self::new(command, args))
    }

    pub fn for_name(name: &str) -> Self {
        Self::new(Command::ForName, vec![RemoteValue::string(name).to_datum()])
    }

    pub fn new_instance(class: &RemoteValue) -> Result<Self, ProtocolError> {
        let class = assert_type(Some(class), ValueKind::Class)?;
        Ok(Self::new(Command::NewInstance, vec![class.to_datum()]))
    }

    pub fn get_remote_class(obj: &RemoteValue) -> Result<Self, ProtocolError> {
        let obj = assert_object(Some(obj))?;
        Ok(Self::new(Command::GetRemoteClass, vec![obj.to_datum()]))
    }

    pub fn get_array_element(array: &RemoteValue, index: usize) -> Result<Self, ProtocolError> {
        let array = assert_type(Some(array), ValueKind::Array)?;
        Ok(Self::new(
            Command::GetArrayElement,
            vec![array.to_datum(), RemoteValue::number(index as f64).to_datum()],
        ))
    }

    pub fn get_array_length(array: &RemoteValue) -> Result<Self, ProtocolError> {
        let array = assert_type(Some(array), ValueKind::Array)?;
        Ok(Self::new(Command::GetArrayLength, vec![array.to_datum()]))
    }

    pub fn set_array_element(
        array: &RemoteValue,
        index: usize,
        value: &RemoteValue,
    ) -> Result<Self, ProtocolError> {
        let array = assert_type(Some(array), ValueKind::Array)?;
        Ok(Self::new(
            Command::SetArrayElement,
            vec![
                array.to_datum(),
                RemoteValue::number(index as f64).to_datum(),
                value.to_datum(),
            ],
        ))
    }

    pub fn get_field(obj: &RemoteValue, name: &str) -> Result<Self, ProtocolError> {
        let obj = assert_object(Some(obj))?;
        Ok(Self::new(
            Command::GetField,
            vec![obj.to_datum(), RemoteValue::string(name).to_datum()],
        ))
    }

    /// Read `field` from its owner, or from `base` when given.
    pub fn get(field: &RemoteValue, base: Option<&RemoteValue>) -> Result<Self, ProtocolError> {
        let field = assert_type(Some(field), ValueKind::Field)?;
        let mut args = vec![field.to_datum()];
        if let Some(base) = base {
            args.push(assert_object(Some(base))?.to_datum());
        }
        Ok(Self::new(Command::Get, args))
    }

    /// Look a method up by name, optionally narrowed by CLASS handles for
    /// its parameter types.
    pub fn get_method(
        obj: &RemoteValue,
        name: &str,
        arg_types: Option<&[RemoteValue]>,
    ) -> Result<Self, ProtocolError> {
        let obj = assert_object(Some(obj))?;
        let mut args = vec![obj.to_datum(), RemoteValue::string(name).to_datum()];
        if let Some(types) = arg_types {
            for t in types {
                assert_type(Some(t), ValueKind::Class)?;
            }
            args.push(list(types));
        }
        Ok(Self::new(Command::GetMethod, args))
    }

    pub fn invoke(
        method: &RemoteValue,
        args: Option<&[RemoteValue]>,
    ) -> Result<Self, ProtocolError> {
        let method = assert_type(Some(method), ValueKind::Method)?;
        let mut datums = vec![method.to_datum()];
        if let Some(args) = args {
            datums.push(list(args));
        }
        Ok(Self::new(Command::Invoke, datums))
    }

    /// Request envelope for this call, registering its graph in `ctx`.
    pub fn encode(&self, ctx: &mut SerializationContext) -> String {
        encode_request(ctx, &self.command.to_datum(), &self.args)
    }
}

/// Apply the response envelope to `ctx` and unwrap the return value.
/// A response without a return value reads as NULL.
pub fn decode_result(
    ctx: &mut SerializationContext,
    reply: &str,
) -> Result<RemoteValue, ReflectError> {
    match decode_response(ctx, reply)? {
        Some(rtrn) => Ok(RemoteValue::from_datum(&rtrn)?),
        None => Ok(RemoteValue::null()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj() -> RemoteValue {
        RemoteValue::new(ValueKind::Object, "1")
    }

    #[test]
    fn wrong_kinds_are_rejected_locally() {
        let string = RemoteValue::string("x");
        assert_eq!(
            Call::new_instance(&obj()).unwrap_err(),
            ProtocolError::WrongKind {
                expected: ValueKind::Class,
                found: ValueKind::Object
            }
        );
        assert!(Call::get_array_length(&obj()).is_err());
        assert!(Call::get(&obj(), None).is_err());
        assert!(Call::invoke(&obj(), None).is_err());
        assert!(Call::get_field(&string, "size").is_err());
        assert_eq!(
            Call::get_remote_class(&string).unwrap_err(),
            ProtocolError::NotAHandle(ValueKind::String)
        );
        assert!(Call::get_method(&obj(), "m", Some(&[string.clone()])).is_err());
        assert!(Call::increase(&[string]).is_err());
        assert!(Call::decrease(&[]).is_err());
    }

    #[test]
    fn arguments_are_handle_nodes() {
        let call = Call::get_field(&obj(), "size").unwrap();
        assert_eq!(call.command(), Command::GetField);
        assert_eq!(call.args.len(), 2);
        let name = RemoteValue::from_datum(&call.args[1]).unwrap();
        assert_eq!(name, RemoteValue::string("size"));
    }

    #[test]
    fn optional_arguments() {
        let field = RemoteValue::new(ValueKind::Field, "2");
        assert_eq!(Call::get(&field, None).unwrap().args.len(), 1);
        assert_eq!(Call::get(&field, Some(&obj())).unwrap().args.len(), 2);

        let method = RemoteValue::new(ValueKind::Method, "3");
        let args = [RemoteValue::number(1.0), RemoteValue::null()];
        let call = Call::invoke(&method, Some(&args)).unwrap();
        let items = call.args[1].as_node().unwrap().items().unwrap();
        assert_eq!(items.len(), 2);
        assert!(RemoteValue::from_datum(&items[1]).unwrap().is_null());
    }

    #[test]
    fn response_without_return_value_is_null() {
        let mut ctx = SerializationContext::new();
        let reply = crate::wire::encode_response(&mut SerializationContext::new(), None);
        assert!(decode_result(&mut ctx, &reply).unwrap().is_null());
    }
}
