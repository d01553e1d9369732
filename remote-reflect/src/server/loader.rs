//! Class registry consulted by FOR_NAME and by CLASS check-in.

use std::sync::Arc;

use dashmap::DashMap;

use super::fault::Fault;
use super::object::{ClassBuilder, ClassDef, Value};

/// Classes every loader knows about.
const BUILTINS: [&str; 6] = ["Number", "String", "Class", "Field", "Method", "Reflector"];

/// Longest array `Array.create` will allocate.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Concurrent name -> class map.
pub struct ClassLoader {
    classes: DashMap<String, Arc<ClassDef>>,
}

impl ClassLoader {
    /// Loader pre-populated with the built-in and failure classes.
    pub fn new() -> Self {
        let loader = Self {
            classes: DashMap::new(),
        };
        loader.register(ClassBuilder::new("Object").build());
        for name in BUILTINS {
            loader.register(ClassBuilder::new(name).not_instantiable().build());
        }
        loader.register(
            ClassBuilder::new("Array")
                .not_instantiable()
                .static_method("create", &["Number"], |_, args| {
                    let len = args[0].as_number().unwrap_or(-1.0);
                    if len < 0.0 || len.fract() != 0.0 || len > MAX_ARRAY_LEN as f64 {
                        return Err(Fault::illegal(format!("invalid array length {len}")));
                    }
                    Ok(Value::array(vec![Value::Null; len as usize]))
                })
                .build(),
        );
        for name in Fault::CLASS_NAMES {
            loader.register(ClassBuilder::failure(name).build());
        }
        loader
    }

    /// Register (or replace) a class under its own name.
    pub fn register(&self, class: ClassDef) -> Arc<ClassDef> {
        let class = Arc::new(class);
        tracing::debug!(class = %class.name(), "Registering class");
        self.classes
            .insert(class.name().to_string(), Arc::clone(&class));
        class
    }

    pub fn for_name(&self, name: &str) -> Result<Arc<ClassDef>, Fault> {
        self.classes
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Fault::ClassNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Failure object describing `fault`.
    pub fn failure(&self, fault: &Fault) -> Value {
        match self.for_name(fault.class_name()) {
            Ok(class) => class.failure_instance(&fault.to_string()),
            // Only reachable if a failure class was replaced by a non-failure
            // registration; fall back to a detached failure class.
            Err(_) => Arc::new(ClassBuilder::failure(fault.class_name()).build())
                .failure_instance(&fault.to_string()),
        }
    }
}

impl Default for ClassLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ValueKind;

    #[test]
    fn builtins_are_loadable() {
        let loader = ClassLoader::new();
        for name in ["Object", "Number", "String", "Array", "Field", "Method"] {
            assert!(loader.contains(name), "missing {name}");
        }
        for name in Fault::CLASS_NAMES {
            assert!(loader.for_name(name).unwrap().is_failure());
        }
        assert!(loader.for_name("Object").unwrap().new_instance().is_ok());
        assert!(loader.for_name("Number").unwrap().new_instance().is_err());
    }

    #[test]
    fn unknown_class_faults() {
        let loader = ClassLoader::new();
        assert_eq!(
            loader.for_name("Nope").unwrap_err(),
            Fault::ClassNotFound("Nope".into())
        );
    }

    #[test]
    fn register_replaces_by_name() {
        let loader = ClassLoader::new();
        let before = loader.len();
        loader.register(ClassBuilder::new("Widget").field("size", 1.0).build());
        loader.register(ClassBuilder::new("Widget").field("size", 2.0).build());
        assert_eq!(loader.len(), before + 1);

        let widget = loader.for_name("Widget").unwrap().new_instance().unwrap();
        assert_eq!(
            widget.as_object().unwrap().get("size").unwrap().as_number(),
            Some(2.0)
        );
    }

    #[test]
    fn array_create() {
        let loader = ClassLoader::new();
        let array = loader.for_name("Array").unwrap();
        let create = array.find_method("create", None).unwrap();
        assert!(create.is_static);
    }

    #[test]
    fn failure_objects_carry_the_message() {
        let loader = ClassLoader::new();
        let failure = loader.failure(&Fault::ClassNotFound("Gizmo".into()));
        assert_eq!(failure.kind(), ValueKind::Exception);
        assert_eq!(failure.class_name(), Some("ClassNotFoundException"));
        assert_eq!(
            failure.as_object().unwrap().get("message").unwrap().as_str(),
            Some("class not found: Gizmo")
        );
    }
}
