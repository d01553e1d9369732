//! Server-side object model.
//!
//! Commands operate on [`Value`]s. Classes are described by [`ClassDef`]s
//! (fields with per-instance initializers, static fields, methods with typed
//! parameters) and registered with the class loader through [`ClassBuilder`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;

use super::fault::Fault;
use crate::protocol::ValueKind;

/// Method implementation: receiver (absent for static calls) and arguments.
pub type MethodBody = Arc<dyn Fn(Option<&Value>, &[Value]) -> Result<Value, Fault> + Send + Sync>;

type Initializer = Arc<dyn Fn() -> Value + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Str(String),
    Class(Arc<ClassDef>),
    Object(Arc<Instance>),
    Array(Arc<ArrayObject>),
    Field(Arc<BoundField>),
    Method(Arc<BoundMethod>),
    Reflector(Arc<Session>),
}

/// What makes two values "the same object" for the identity cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Ref(usize),
    Field(usize, String),
    Method(usize, String, Vec<String>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Arc::new(ArrayObject::new(items)))
    }

    /// Wire classification. Instances of failure classes are exceptions.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Number(_) => ValueKind::Number,
            Self::Str(_) => ValueKind::String,
            Self::Class(_) => ValueKind::Class,
            Self::Object(inst) if inst.class.is_failure() => ValueKind::Exception,
            Self::Object(_) => ValueKind::Object,
            Self::Array(_) => ValueKind::Array,
            Self::Field(_) => ValueKind::Field,
            Self::Method(_) => ValueKind::Method,
            Self::Reflector(_) => ValueKind::Reflector,
        }
    }

    /// Name of the class `getRemoteClass` reports for this value.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Number(_) => Some("Number"),
            Self::Str(_) => Some("String"),
            Self::Class(_) => Some("Class"),
            Self::Object(inst) => Some(inst.class.name()),
            Self::Array(_) => Some("Array"),
            Self::Field(_) => Some("Field"),
            Self::Method(_) => Some("Method"),
            Self::Reflector(_) => Some("Reflector"),
        }
    }

    fn addr(&self) -> Option<usize> {
        let addr = match self {
            Self::Null | Self::Number(_) | Self::Str(_) => return None,
            Self::Class(c) => Arc::as_ptr(c) as *const () as usize,
            Self::Object(o) => Arc::as_ptr(o) as *const () as usize,
            Self::Array(a) => Arc::as_ptr(a) as *const () as usize,
            Self::Field(f) => Arc::as_ptr(f) as *const () as usize,
            Self::Method(m) => Arc::as_ptr(m) as *const () as usize,
            Self::Reflector(r) => Arc::as_ptr(r) as *const () as usize,
        };
        Some(addr)
    }

    /// Cache identity; `None` for values that travel by value (literals and
    /// classes). Bound members are identified by owner and member, so binding
    /// the same field twice yields the same identity.
    pub fn identity(&self) -> Option<Identity> {
        match self {
            Self::Null | Self::Number(_) | Self::Str(_) | Self::Class(_) => None,
            Self::Field(f) => Some(Identity::Field(f.owner.addr()?, f.name.clone())),
            Self::Method(m) => {
                let owner = match &m.receiver {
                    Some(receiver) => receiver.addr()?,
                    None => Arc::as_ptr(&m.class) as *const () as usize,
                };
                Some(Identity::Method(
                    owner,
                    m.method.name.clone(),
                    m.method.params.clone(),
                ))
            }
            other => other.addr().map(Identity::Ref),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Instance>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<ArrayObject>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Name of the class a parameter of this value's type is declared with.
    fn type_name(&self) -> Option<&str> {
        self.class_name()
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

// Object graphs may be cyclic, so only shallow information is printed.
impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Class(c) => write!(f, "Class({})", c.name),
            Self::Object(o) => write!(f, "Object({})", o.class.name),
            Self::Array(a) => write!(f, "Array(len={})", a.len()),
            Self::Field(b) => write!(f, "Field({})", b.name),
            Self::Method(m) => write!(f, "Method({})", m.method.name),
            Self::Reflector(s) => write!(f, "Reflector({})", s.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Plain,
    Failure,
}

pub struct FieldDef {
    name: String,
    init: Initializer,
}

#[derive(Clone)]
pub struct MethodDef {
    pub name: String,
    /// Declared parameter type names.
    pub params: Vec<String>,
    pub is_static: bool,
    body: MethodBody,
}

impl MethodDef {
    fn call(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Fault> {
        (self.body)(receiver, args)
    }
}

/// A loadable class.
pub struct ClassDef {
    name: String,
    kind: ClassKind,
    instantiable: bool,
    fields: Vec<FieldDef>,
    statics: Mutex<IndexMap<String, Value>>,
    methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_failure(&self) -> bool {
        self.kind == ClassKind::Failure
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn has_static(&self, name: &str) -> bool {
        lock(&self.statics).contains_key(name)
    }

    pub fn get_static(&self, name: &str) -> Result<Value, Fault> {
        lock(&self.statics)
            .get(name)
            .cloned()
            .ok_or_else(|| self.no_field(name))
    }

    pub fn set_static(&self, name: &str, value: Value) -> Result<(), Fault> {
        match lock(&self.statics).get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.no_field(name)),
        }
    }

    fn no_field(&self, name: &str) -> Fault {
        Fault::NoSuchField {
            class: self.name.clone(),
            field: name.to_string(),
        }
    }

    pub fn new_instance(self: &Arc<Self>) -> Result<Value, Fault> {
        if !self.instantiable {
            return Err(Fault::Instantiation(self.name.clone()));
        }
        Ok(Value::Object(Arc::new(self.instantiate())))
    }

    fn instantiate(self: &Arc<Self>) -> Instance {
        let fields = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), (f.init)()))
            .collect();
        Instance {
            class: Arc::clone(self),
            fields: Mutex::new(fields),
        }
    }

    /// Failure object carrying `message`; bypasses the instantiable flag.
    pub(crate) fn failure_instance(self: &Arc<Self>, message: &str) -> Value {
        let instance = self.instantiate();
        lock(&instance.fields).insert("message".to_string(), Value::from(message));
        Value::Object(Arc::new(instance))
    }

    /// Look a method up by name and, when given, exact parameter types.
    /// Without parameter types the first method with that name wins.
    pub fn find_method(&self, name: &str, params: Option<&[String]>) -> Result<&MethodDef, Fault> {
        self.methods
            .iter()
            .find(|m| m.name == name && params.is_none_or(|p| m.params == p))
            .ok_or_else(|| Fault::NoSuchMethod {
                class: self.name.clone(),
                method: match params {
                    Some(p) => format!("{name}({})", p.join(", ")),
                    None => name.to_string(),
                },
            })
    }
}

impl std::fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// An instance of a [`ClassDef`].
pub struct Instance {
    class: Arc<ClassDef>,
    fields: Mutex<IndexMap<String, Value>>,
}

impl Instance {
    pub fn class(&self) -> &Arc<ClassDef> {
        &self.class
    }

    pub fn get(&self, name: &str) -> Result<Value, Fault> {
        lock(&self.fields)
            .get(name)
            .cloned()
            .ok_or_else(|| self.class.no_field(name))
    }

    pub fn set(&self, name: &str, value: Value) -> Result<(), Fault> {
        match lock(&self.fields).get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.class.no_field(name)),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        lock(&self.fields).contains_key(name)
    }
}

pub struct ArrayObject {
    elements: Mutex<Vec<Value>>,
}

impl ArrayObject {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            elements: Mutex::new(items),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.elements).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(index: f64, len: usize) -> Result<usize, Fault> {
        if index < 0.0 || index.fract() != 0.0 || index >= len as f64 {
            return Err(Fault::IndexOutOfBounds { index, len });
        }
        Ok(index as usize)
    }

    pub fn get(&self, index: f64) -> Result<Value, Fault> {
        let elements = lock(&self.elements);
        let i = Self::slot(index, elements.len())?;
        Ok(elements[i].clone())
    }

    pub fn set(&self, index: f64, value: Value) -> Result<(), Fault> {
        let mut elements = lock(&self.elements);
        let i = Self::slot(index, elements.len())?;
        elements[i] = value;
        Ok(())
    }
}

/// A field bound to the object (or class, for statics) it was looked up on.
pub struct BoundField {
    pub owner: Value,
    pub name: String,
}

impl BoundField {
    /// Read the field from `base`, or from the owner when `base` is absent.
    pub fn read(&self, base: Option<&Value>) -> Result<Value, Fault> {
        let target = base.unwrap_or(&self.owner);
        match target {
            Value::Object(inst) => inst.get(&self.name),
            Value::Class(class) => class.get_static(&self.name),
            Value::Array(array) if self.name == "length" => Ok(Value::Number(array.len() as f64)),
            other => Err(Fault::NoSuchField {
                class: other.class_name().unwrap_or("null").to_string(),
                field: self.name.clone(),
            }),
        }
    }
}

/// A method bound to its receiver; static methods have none.
pub struct BoundMethod {
    pub receiver: Option<Value>,
    pub class: Arc<ClassDef>,
    pub method: MethodDef,
}

impl BoundMethod {
    pub fn invoke(&self, args: &[Value]) -> Result<Value, Fault> {
        let method = &self.method;
        if args.len() != method.params.len() {
            return Err(Fault::illegal(format!(
                "{}.{} takes {} argument(s), got {}",
                self.class.name,
                method.name,
                method.params.len(),
                args.len()
            )));
        }
        for (arg, param) in args.iter().zip(&method.params) {
            let accepted = param == "Object" || arg.is_null() || arg.type_name() == Some(param);
            if !accepted {
                return Err(Fault::illegal(format!(
                    "{}.{} expects {param}, got {}",
                    self.class.name,
                    method.name,
                    arg.type_name().unwrap_or("null")
                )));
            }
        }
        let receiver = if method.is_static {
            None
        } else {
            Some(self.receiver.as_ref().ok_or_else(|| {
                Fault::illegal(format!(
                    "{}.{} needs a receiver",
                    self.class.name, method.name
                ))
            })?)
        };
        method.call(receiver, args)
    }
}

/// Server half of a registered client proxy.
#[derive(Debug)]
pub struct Session {
    pub id: uuid::Uuid,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`ClassDef`].
///
/// ```
/// use remote_reflect::server::{ClassBuilder, Value};
///
/// let widget = ClassBuilder::new("Widget")
///     .field("size", 10.0)
///     .method("area", &[], |this, _| {
///         let size = this.and_then(|v| v.as_object()).unwrap().get("size")?;
///         Ok(Value::Number(size.as_number().unwrap_or(0.0).powi(2)))
///     })
///     .build();
/// assert_eq!(widget.name(), "Widget");
/// ```
pub struct ClassBuilder {
    def: ClassDef,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: ClassDef {
                name: name.into(),
                kind: ClassKind::Plain,
                instantiable: true,
                fields: Vec::new(),
                statics: Mutex::new(IndexMap::new()),
                methods: Vec::new(),
            },
        }
    }

    pub(crate) fn failure(name: &str) -> Self {
        let mut builder = Self::new(name).field("message", "");
        builder.def.kind = ClassKind::Failure;
        builder.def.instantiable = false;
        builder
    }

    /// Instance field initialized to a copy of `initial`.
    ///
    /// Use [`ClassBuilder::field_with`] for arrays or objects, which would
    /// otherwise be shared by every instance.
    pub fn field(self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        let initial = initial.into();
        self.field_with(name, move || initial.clone())
    }

    /// Instance field initialized by calling `init` for every new instance.
    pub fn field_with<F>(mut self, name: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.def.fields.push(FieldDef {
            name: name.into(),
            init: Arc::new(init),
        });
        self
    }

    pub fn static_field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        lock(&self.def.statics).insert(name.into(), value.into());
        self
    }

    pub fn method<F>(self, name: impl Into<String>, params: &[&str], body: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.push_method(name.into(), params, false, Arc::new(body))
    }

    pub fn static_method<F>(self, name: impl Into<String>, params: &[&str], body: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.push_method(name.into(), params, true, Arc::new(body))
    }

    fn push_method(
        mut self,
        name: String,
        params: &[&str],
        is_static: bool,
        body: MethodBody,
    ) -> Self {
        self.def.methods.push(MethodDef {
            name,
            params: params.iter().map(|p| p.to_string()).collect(),
            is_static,
            body,
        });
        self
    }

    /// Refuse `newInstance`.
    pub fn not_instantiable(mut self) -> Self {
        self.def.instantiable = false;
        self
    }

    pub fn build(self) -> ClassDef {
        self.def
    }
}
