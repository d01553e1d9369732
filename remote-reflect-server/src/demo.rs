//! Classes the standalone server exposes.

use std::sync::Arc;

use remote_reflect::server::{ClassBuilder, ClassLoader, Fault, Instance, Value};

fn receiver(this: Option<&Value>) -> Result<&Arc<Instance>, Fault> {
    this.and_then(Value::as_object)
        .ok_or_else(|| Fault::illegal("method needs a receiver"))
}

fn number(value: &Value) -> f64 {
    value.as_number().unwrap_or(0.0)
}

pub fn register(loader: &ClassLoader) {
    loader.register(
        ClassBuilder::new("Widget")
            .field("size", 10.0)
            .field("label", "widget")
            .field_with("parts", || Value::array(vec![Value::Null; 4]))
            .static_field("unit", "mm")
            .method("grow", &["Number"], |this, args| {
                let this = receiver(this)?;
                let size = number(&this.get("size")?) + number(&args[0]);
                this.set("size", Value::Number(size))?;
                Ok(Value::Number(size))
            })
            .method("rename", &["String"], |this, args| {
                receiver(this)?.set("label", args[0].clone())?;
                Ok(Value::Null)
            })
            .method("area", &[], |this, _| {
                let size = number(&receiver(this)?.get("size")?);
                Ok(Value::Number(size * size))
            })
            .method("explode", &[], |_, _| Err(Fault::target("widget exploded")))
            .static_method("describe", &["Object"], |_, args| {
                let text = match &args[0] {
                    Value::Null => "null".to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Str(s) => s.clone(),
                    other => other.class_name().unwrap_or("?").to_string(),
                };
                Ok(Value::from(format!("<{text}>")))
            })
            .build(),
    );

    loader.register(
        ClassBuilder::new("Counter")
            .field("count", 0.0)
            .method("increment", &[], |this, _| {
                let this = receiver(this)?;
                let count = number(&this.get("count")?) + 1.0;
                this.set("count", Value::Number(count))?;
                Ok(Value::Number(count))
            })
            .method("reset", &[], |this, _| {
                receiver(this)?.set("count", Value::Number(0.0))?;
                Ok(Value::Null)
            })
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_reflect::server::{Executor, IdentityCache};
    use remote_reflect::{Loopback, Reflector, RemoteValue, ValueKind};
    use std::time::Duration;

    fn reflector() -> Reflector<Loopback> {
        let loader = Arc::new(ClassLoader::new());
        register(&loader);
        let cache = Arc::new(IdentityCache::new(Duration::from_secs(60)));
        Reflector::new(Loopback::new(Arc::new(Executor::new(loader, cache))))
    }

    #[test]
    fn widget_grows() {
        let r = reflector();
        let widget = r.new_instance(&r.for_name("Widget").unwrap()).unwrap();
        let grow = r
            .get_method(&widget, "grow", Some(&[RemoteValue::class("Number")]))
            .unwrap();
        let size = r.invoke(&grow, Some(&[RemoteValue::number(5.0)])).unwrap();
        assert_eq!(size.as_number(), Some(15.0));

        let area = r.get_method(&widget, "area", None).unwrap();
        assert_eq!(r.invoke(&area, None).unwrap().as_number(), Some(225.0));
    }

    #[test]
    fn describe_accepts_any_value() {
        let r = reflector();
        let class = RemoteValue::class("Widget");
        let describe = r.get_method(&class, "describe", None).unwrap();
        let text = r.invoke(&describe, Some(&[RemoteValue::string("x")])).unwrap();
        assert_eq!(text.as_str(), Some("<x>"));
        let counter = r.new_instance(&RemoteValue::class("Counter")).unwrap();
        let text = r.invoke(&describe, Some(&[counter])).unwrap();
        assert_eq!(text.as_str(), Some("<Counter>"));
    }

    #[test]
    fn explode_is_an_exception() {
        let r = reflector();
        let widget = r.new_instance(&RemoteValue::class("Widget")).unwrap();
        let explode = r.get_method(&widget, "explode", None).unwrap();
        let result = r.invoke(&explode, None).unwrap();
        assert_eq!(result.kind, ValueKind::Exception);
    }
}
