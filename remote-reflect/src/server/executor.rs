//! Command execution.
//!
//! One request, one pass:
//! 1. decode the envelope (context update first, then base and arguments)
//! 2. look the command up in [`ROUTES`]; unknown command or wrong argument
//!    count answers NULL
//! 3. check arguments in (handle -> live value)
//! 4. run the reflective operation
//! 5. check the result out (live value -> handle)
//! 6. a fault or panic in 3-5 becomes a cached failure object and an
//!    EXCEPTION handle
//! 7. encode the response envelope

use std::ops::RangeInclusive;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use super::cache::IdentityCache;
use super::fault::Fault;
use super::loader::ClassLoader;
use super::object::{BoundField, BoundMethod, Session, Value};
use crate::protocol::{Command, ProtocolError, RemoteValue, ValueKind};
use crate::wire::{Datum, Request, SerializationContext, decode_request, encode_response};

/// A decoded argument: a single handle or a list of them.
#[derive(Debug, Clone)]
pub enum Arg {
    One(RemoteValue),
    List(Vec<RemoteValue>),
}

impl Arg {
    pub fn from_datum(datum: &Datum) -> Result<Self, ProtocolError> {
        let node = datum
            .as_node()
            .ok_or_else(|| ProtocolError::Malformed(format!("expected a node, got {datum:?}")))?;
        if node.get("length").is_some() {
            let items = node
                .items()
                .ok_or_else(|| ProtocolError::Malformed("incomplete list".to_string()))?;
            let values = items
                .iter()
                .map(RemoteValue::from_datum)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self::List(values))
        } else {
            RemoteValue::from_node(node).map(Self::One)
        }
    }
}

type Handler = fn(&Executor, &[Arg]) -> Result<Value, Fault>;

struct Route {
    arity: RangeInclusive<usize>,
    handler: Handler,
}

/// Indexed by command code.
const ROUTES: [Route; 13] = [
    Route { arity: 0..=0, handler: Executor::register },
    Route { arity: 1..=usize::MAX, handler: Executor::increase },
    Route { arity: 1..=usize::MAX, handler: Executor::decrease },
    Route { arity: 1..=1, handler: Executor::for_name },
    Route { arity: 1..=1, handler: Executor::new_instance },
    Route { arity: 1..=1, handler: Executor::get_remote_class },
    Route { arity: 2..=2, handler: Executor::get_array_element },
    Route { arity: 1..=1, handler: Executor::get_array_length },
    Route { arity: 3..=3, handler: Executor::set_array_element },
    Route { arity: 2..=2, handler: Executor::get_field },
    Route { arity: 1..=2, handler: Executor::get },
    Route { arity: 2..=3, handler: Executor::get_method },
    Route { arity: 1..=2, handler: Executor::invoke },
];

pub struct Executor {
    loader: Arc<ClassLoader>,
    cache: Arc<IdentityCache>,
}

impl Executor {
    pub fn new(loader: Arc<ClassLoader>, cache: Arc<IdentityCache>) -> Self {
        Self { loader, cache }
    }

    pub fn loader(&self) -> &Arc<ClassLoader> {
        &self.loader
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Run one request envelope and produce the response envelope.
    pub fn execute(&self, body: &str) -> String {
        let mut ctx = SerializationContext::new();
        let rtrn = match decode_request(&mut ctx, body) {
            Ok(request) => self.dispatch(&request),
            Err(e) => {
                warn!(error = %e, "Malformed request envelope");
                ctx = SerializationContext::new();
                RemoteValue::null()
            }
        };
        encode_response(&mut ctx, Some(&rtrn.to_datum()))
    }

    pub fn dispatch(&self, request: &Request) -> RemoteValue {
        let Some(command) = Command::from_datum(&request.base) else {
            debug!(base = ?request.base, "Unrecognized command");
            return RemoteValue::null();
        };

        let args = match request
            .args
            .iter()
            .map(Arg::from_datum)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(args) => args,
            Err(e) => {
                debug!(command = command.as_str(), error = %e, "Malformed arguments");
                return RemoteValue::null();
            }
        };

        let route = &ROUTES[command.code() as usize];
        if !route.arity.contains(&args.len()) {
            debug!(
                command = command.as_str(),
                args = args.len(),
                "Wrong argument count"
            );
            return RemoteValue::null();
        }

        debug!(command = command.as_str(), args = args.len(), "Dispatching command");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (route.handler)(self, &args).map(|value| self.check_out(value))
        }))
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "method panicked".to_string());
            Err(Fault::Target(message))
        });

        match outcome {
            Ok(result) => result,
            Err(fault) => {
                debug!(command = command.as_str(), fault = %fault, "Command raised");
                self.check_out(self.loader.failure(&fault))
            }
        }
    }

    /// Handle -> live value.
    pub fn check_in(&self, handle: &RemoteValue) -> Result<Value, Fault> {
        match handle.kind {
            ValueKind::Null => Ok(Value::Null),
            ValueKind::String => Ok(Value::Str(handle.value_id.clone())),
            ValueKind::Number => handle
                .value_id
                .parse()
                .map(Value::Number)
                .map_err(|_| Fault::illegal(format!("'{}' is not a number", handle.value_id))),
            ValueKind::Class => self.loader.for_name(&handle.value_id).map(Value::Class),
            kind => {
                let value = self
                    .cache
                    .lookup(&handle.value_id)
                    .ok_or_else(|| Fault::UnknownHandle(handle.value_id.clone()))?;
                if value.kind() != kind {
                    return Err(Fault::illegal(format!(
                        "handle {} is {}, not {kind}",
                        handle.value_id,
                        value.kind()
                    )));
                }
                Ok(value)
            }
        }
    }

    /// Live value -> handle. Objects are cached; re-exposing one reuses its key.
    pub fn check_out(&self, value: Value) -> RemoteValue {
        match value {
            Value::Null => RemoteValue::null(),
            Value::Number(n) => RemoteValue::number(n),
            Value::Str(s) => RemoteValue::string(s),
            Value::Class(class) => RemoteValue::class(class.name()),
            other => {
                let kind = other.kind();
                match self.cache.cache_key(&other) {
                    Some(key) => RemoteValue::new(kind, key),
                    None => RemoteValue::null(),
                }
            }
        }
    }

    fn one<'a>(&self, args: &'a [Arg], i: usize) -> Result<&'a RemoteValue, Fault> {
        match args.get(i) {
            Some(Arg::One(value)) => Ok(value),
            Some(Arg::List(_)) => Err(Fault::illegal(format!("argument {i} must not be a list"))),
            None => Err(Fault::illegal(format!("missing argument {i}"))),
        }
    }

    fn list<'a>(&self, args: &'a [Arg], i: usize) -> Result<&'a [RemoteValue], Fault> {
        match args.get(i) {
            Some(Arg::List(values)) => Ok(values),
            Some(Arg::One(_)) => Err(Fault::illegal(format!("argument {i} must be a list"))),
            None => Err(Fault::illegal(format!("missing argument {i}"))),
        }
    }

    /// Check in argument `i`, which must be tagged `kind`.
    fn typed(&self, args: &[Arg], i: usize, kind: ValueKind) -> Result<Value, Fault> {
        let handle = self.one(args, i)?;
        if handle.kind != kind {
            return Err(Fault::illegal(format!(
                "argument {i} must be {kind}, got {}",
                handle.kind
            )));
        }
        self.check_in(handle)
    }

    fn text(&self, args: &[Arg], i: usize) -> Result<String, Fault> {
        match self.typed(args, i, ValueKind::String)? {
            Value::Str(s) => Ok(s),
            _ => Err(Fault::illegal(format!("argument {i} must be a string"))),
        }
    }

    fn number(&self, args: &[Arg], i: usize) -> Result<f64, Fault> {
        self.typed(args, i, ValueKind::Number)?
            .as_number()
            .ok_or_else(|| Fault::illegal(format!("argument {i} must be a number")))
    }

    fn array(&self, args: &[Arg], i: usize) -> Result<Arc<super::object::ArrayObject>, Fault> {
        self.typed(args, i, ValueKind::Array)?
            .as_array()
            .cloned()
            .ok_or_else(|| Fault::illegal(format!("argument {i} must be an array")))
    }

    fn register(&self, _args: &[Arg]) -> Result<Value, Fault> {
        let session = Session::new();
        debug!(session = %session.id, "Registered reflector");
        Ok(Value::Reflector(Arc::new(session)))
    }

    fn increase(&self, args: &[Arg]) -> Result<Value, Fault> {
        self.adjust(args, IdentityCache::increase_all)
    }

    fn decrease(&self, args: &[Arg]) -> Result<Value, Fault> {
        self.adjust(args, IdentityCache::decrease_all)
    }

    /// Every handle is checked before any count moves.
    fn adjust(
        &self,
        args: &[Arg],
        op: fn(&IdentityCache, &[&str]) -> Result<(), String>,
    ) -> Result<Value, Fault> {
        let mut keys = Vec::with_capacity(args.len());
        for i in 0..args.len() {
            let handle = self.one(args, i)?;
            if !handle.is_object() {
                return Err(Fault::illegal(format!("{handle} is not a handle")));
            }
            keys.push(handle.value_id.as_str());
        }
        op(&self.cache, &keys).map_err(Fault::UnknownHandle)?;
        Ok(Value::Null)
    }

    fn for_name(&self, args: &[Arg]) -> Result<Value, Fault> {
        let name = self.text(args, 0)?;
        self.loader.for_name(&name).map(Value::Class)
    }

    fn new_instance(&self, args: &[Arg]) -> Result<Value, Fault> {
        match self.typed(args, 0, ValueKind::Class)? {
            Value::Class(class) => class.new_instance(),
            _ => Err(Fault::illegal("argument 0 must be a class")),
        }
    }

    fn get_remote_class(&self, args: &[Arg]) -> Result<Value, Fault> {
        let value = self.check_in(self.one(args, 0)?)?;
        let name = value
            .class_name()
            .ok_or_else(|| Fault::illegal("null has no class"))?;
        self.loader.for_name(name).map(Value::Class)
    }

    fn get_array_element(&self, args: &[Arg]) -> Result<Value, Fault> {
        let array = self.array(args, 0)?;
        array.get(self.number(args, 1)?)
    }

    fn get_array_length(&self, args: &[Arg]) -> Result<Value, Fault> {
        Ok(Value::Number(self.array(args, 0)?.len() as f64))
    }

    fn set_array_element(&self, args: &[Arg]) -> Result<Value, Fault> {
        let array = self.array(args, 0)?;
        let index = self.number(args, 1)?;
        let value = self.check_in(self.one(args, 2)?)?;
        array.set(index, value)?;
        Ok(Value::Null)
    }

    fn get_field(&self, args: &[Arg]) -> Result<Value, Fault> {
        let owner = self.check_in(self.one(args, 0)?)?;
        let name = self.text(args, 1)?;
        let exists = match &owner {
            Value::Object(inst) => inst.has_field(&name),
            Value::Class(class) => class.has_static(&name),
            Value::Array(_) => name == "length",
            _ => false,
        };
        if !exists {
            return Err(Fault::NoSuchField {
                class: owner.class_name().unwrap_or("null").to_string(),
                field: name,
            });
        }
        Ok(Value::Field(Arc::new(BoundField { owner, name })))
    }

    fn get(&self, args: &[Arg]) -> Result<Value, Fault> {
        let field = match self.typed(args, 0, ValueKind::Field)? {
            Value::Field(field) => field,
            _ => return Err(Fault::illegal("argument 0 must be a field")),
        };
        let base = match args.get(1) {
            Some(_) => Some(self.check_in(self.one(args, 1)?)?),
            None => None,
        };
        field.read(base.as_ref())
    }

    fn get_method(&self, args: &[Arg]) -> Result<Value, Fault> {
        let owner = self.check_in(self.one(args, 0)?)?;
        let name = self.text(args, 1)?;
        let params = match args.get(2) {
            Some(_) => Some(
                self.list(args, 2)?
                    .iter()
                    .map(|t| match self.check_in(t)? {
                        Value::Class(class) => Ok(class.name().to_string()),
                        other => Err(Fault::illegal(format!(
                            "parameter types must be classes, got {}",
                            other.kind()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        let (class, receiver) = match &owner {
            Value::Class(class) => (Arc::clone(class), None),
            Value::Object(inst) => (Arc::clone(inst.class()), Some(owner.clone())),
            Value::Null => return Err(Fault::illegal("cannot look up a method on null")),
            other => {
                let name = other.class_name().unwrap_or("Object");
                (self.loader.for_name(name)?, Some(owner.clone()))
            }
        };
        let method = class.find_method(&name, params.as_deref())?.clone();
        let receiver = if method.is_static { None } else { receiver };
        Ok(Value::Method(Arc::new(BoundMethod {
            receiver,
            class,
            method,
        })))
    }

    fn invoke(&self, args: &[Arg]) -> Result<Value, Fault> {
        let method = match self.typed(args, 0, ValueKind::Method)? {
            Value::Method(method) => method,
            _ => return Err(Fault::illegal("argument 0 must be a method")),
        };
        let call_args = match args.get(1) {
            Some(_) => self
                .list(args, 1)?
                .iter()
                .map(|a| self.check_in(a))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        method.invoke(&call_args)
    }
}
