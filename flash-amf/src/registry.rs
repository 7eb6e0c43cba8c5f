//! Mapping between wire objects and application types
//!
//! Typed objects carry a class alias on the wire. A [`TypeRegistry`] resolves aliases to
//! application types, and [`materialize`] / [`dematerialize`] apply it at object boundaries. Objects
//! whose alias is not registered stay in their generic [`Value`] form.

use crate::errors::Error;
use crate::types::{Element, Traits, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// An identifier for a type known to a registry
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TypeHandle(usize);

impl TypeHandle {
    fn unknown(self) -> Error {
        Error::UnknownTypeHandle(self.0)
    }
}

/// The contract between the codec and the application's type system
pub trait TypeRegistry {
    /// The application representation of a typed object
    type Instance;

    /// Find the type registered for a wire alias
    fn resolve_alias(&self, alias: &str) -> Option<TypeHandle>;

    /// The wire alias of a type, `None` if the handle was not issued by this registry
    fn get_alias(&self, handle: TypeHandle) -> Option<&str>;

    /// Build an instance of a type from the properties read off the wire
    fn instantiate(&self, handle: TypeHandle, properties: Vec<Element>) -> Result<Self::Instance, Error>;

    /// The properties of an instance, in the order they should be written
    fn get_properties(&self, instance: &Self::Instance) -> Vec<Element>;

    /// The type of an instance
    fn type_of(&self, instance: &Self::Instance) -> TypeHandle;

    /// The traits objects of this type are written with
    fn traits_of(&self, handle: TypeHandle) -> Result<Rc<Traits>, Error>;
}

/// An instance of a type registered in a [`ClassRegistry`]
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    handle: TypeHandle,

    /// Sealed members in declaration order, followed by any dynamic members
    pub fields: Vec<Element>,
}

impl Record {
    /// The type of this record
    pub fn handle(&self) -> TypeHandle {
        self.handle
    }

    /// Get a field by name
    pub fn get(&self, name: &str) -> Option<&Rc<Value>> {
        self.fields.iter().find(|e| e.name == name).map(|e| &e.value)
    }
}

/// A registry built from explicit registrations, each type described by its traits
///
/// ```
/// use flash_amf::registry::{ClassRegistry, TypeRegistry};
/// use flash_amf::types::Traits;
///
/// let registry = ClassRegistry::default().register(Traits::sealed("com.example.Point", ["x", "y"]));
/// assert!(registry.resolve_alias("com.example.Point").is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<Rc<Traits>>,
    aliases: HashMap<String, TypeHandle>,
}

impl ClassRegistry {
    /// Register a type, replacing any earlier registration of the same alias
    pub fn register(mut self, traits: Traits) -> Self {
        let handle = match self.aliases.get(&traits.alias) {
            Some(handle) => {
                self.classes[handle.0] = Rc::new(traits);
                return self;
            }
            None => TypeHandle(self.classes.len()),
        };

        self.aliases.insert(traits.alias.clone(), handle);
        self.classes.push(Rc::new(traits));
        self
    }

    /// Create a record of a registered type
    pub fn record(&self, alias: &str, fields: Vec<Element>) -> Option<Record> {
        self.resolve_alias(alias).map(|handle| Record { handle, fields })
    }
}

impl TypeRegistry for ClassRegistry {
    type Instance = Record;

    fn resolve_alias(&self, alias: &str) -> Option<TypeHandle> {
        self.aliases.get(alias).copied()
    }

    fn get_alias(&self, handle: TypeHandle) -> Option<&str> {
        self.classes.get(handle.0).map(|traits| traits.alias.as_str())
    }

    fn instantiate(&self, handle: TypeHandle, properties: Vec<Element>) -> Result<Record, Error> {
        let traits = self.classes.get(handle.0).ok_or_else(|| handle.unknown())?;

        let mut fields = Vec::with_capacity(properties.len());
        for name in traits.sealed_members.iter() {
            let element = properties
                .iter()
                .find(|e| &e.name == name)
                .ok_or_else(|| Error::MissingSealedMember(name.clone()))?;
            fields.push(element.clone());
        }

        for element in properties
            .into_iter()
            .filter(|e| !traits.sealed_members.contains(&e.name))
        {
            if traits.is_dynamic() || traits.is_externalizable() {
                fields.push(element);
            } else {
                log::debug!(
                    "Dropping undeclared member {:?} of {:?}",
                    element.name,
                    traits.alias
                );
            }
        }

        Ok(Record { handle, fields })
    }

    fn get_properties(&self, instance: &Record) -> Vec<Element> {
        instance.fields.clone()
    }

    fn type_of(&self, instance: &Record) -> TypeHandle {
        instance.handle
    }

    fn traits_of(&self, handle: TypeHandle) -> Result<Rc<Traits>, Error> {
        self.classes
            .get(handle.0)
            .map(Rc::clone)
            .ok_or_else(|| handle.unknown())
    }
}

/// The result of mapping a value through a registry
#[derive(Clone, Debug, PartialEq)]
pub enum Mapped<I> {
    /// A typed object whose alias is registered
    Typed(I),

    /// Anything else, unchanged
    Generic(Rc<Value>),
}

/// Map a value to an application instance if it is a typed object of a registered type
pub fn materialize<R: TypeRegistry>(
    registry: &R,
    value: &Rc<Value>,
) -> Result<Mapped<R::Instance>, Error> {
    match value.as_ref() {
        Value::Object(traits, elements) if !traits.is_anonymous() => {
            match registry.resolve_alias(&traits.alias) {
                Some(handle) => Ok(Mapped::Typed(registry.instantiate(handle, elements.clone())?)),
                None => {
                    log::debug!("No registered type for {:?}", traits.alias);
                    Ok(Mapped::Generic(Rc::clone(value)))
                }
            }
        }
        Value::AMF3(inner) => materialize(registry, inner),
        _ => Ok(Mapped::Generic(Rc::clone(value))),
    }
}

/// Turn an application instance back into a typed object
pub fn dematerialize<R: TypeRegistry>(
    registry: &R,
    instance: &R::Instance,
) -> Result<Value, Error> {
    let handle = registry.type_of(instance);
    Ok(Value::Object(
        registry.traits_of(handle)?,
        registry.get_properties(instance),
    ))
}

#[cfg(test)]
mod tests {
    use super::{dematerialize, materialize, ClassRegistry, Mapped, TypeRegistry};
    use crate::amf3::read::AMF3Decoder;
    use crate::amf3::write::AMF3Encoder;
    use crate::errors::Error;
    use crate::types::{Element, Traits, Value};
    use std::rc::Rc;

    fn registry() -> ClassRegistry {
        ClassRegistry::default()
            .register(Traits::sealed("Point", ["x", "y"]))
            .register(Traits::dynamic("Bag"))
    }

    fn point(x: i32, y: i32) -> Rc<Value> {
        Rc::new(Value::Object(Rc::new(Traits::sealed("Point", ["x", "y"])), vec![
            Element::new("x", x),
            Element::new("y", y),
        ]))
    }

    #[test]
    fn typed_object_materializes() {
        let registry = registry();
        let Mapped::Typed(record) = materialize(&registry, &point(1, 2)).unwrap() else {
            panic!("expected a typed instance")
        };
        assert_eq!(registry.get_alias(record.handle()), Some("Point"));
        assert_eq!(**record.get("y").unwrap(), Value::Integer(2));
    }

    #[test]
    fn unregistered_alias_stays_generic() {
        let value = Rc::new(Value::Object(Rc::new(Traits::dynamic("Other")), vec![]));
        let Mapped::Generic(generic) = materialize(&registry(), &value).unwrap() else {
            panic!("expected the generic form")
        };
        assert!(Rc::ptr_eq(&generic, &value));

        let anonymous = Rc::new(Value::Object(Rc::new(Traits::default()), vec![]));
        assert!(matches!(
            materialize(&registry(), &anonymous).unwrap(),
            Mapped::Generic(_)
        ));
    }

    #[test]
    fn missing_member_is_an_error() {
        let value = Rc::new(Value::Object(Rc::new(Traits::dynamic("Point")), vec![
            Element::new("x", 1),
        ]));
        assert_eq!(
            materialize(&registry(), &value),
            Err(Error::MissingSealedMember("y".into()))
        );
    }

    #[test]
    fn dynamic_type_keeps_all_members() {
        let registry = registry();
        let value = Rc::new(Value::Object(Rc::new(Traits::dynamic("Bag")), vec![
            Element::new("a", 1),
            Element::new("b", true),
        ]));
        let Mapped::Typed(record) = materialize(&registry, &value).unwrap() else {
            panic!("expected a typed instance")
        };
        assert_eq!(record.fields.len(), 2);
    }

    #[test]
    fn dematerialized_record_encodes_identically() {
        let registry = registry();
        let original = point(3, 4);

        let mut expected = Vec::new();
        AMF3Encoder::default().write_value(&mut expected, &original).unwrap();
        let (_, decoded) = AMF3Decoder::default().parse_single_element(&expected).unwrap();

        let Mapped::Typed(record) = materialize(&registry, &decoded).unwrap() else {
            panic!("expected a typed instance")
        };
        let mut actual = Vec::new();
        AMF3Encoder::default()
            .write_value(&mut actual, &Rc::new(dematerialize(&registry, &record).unwrap()))
            .unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn reregistering_replaces_traits() {
        let registry = registry().register(Traits::sealed("Point", ["x"]));
        let handle = registry.resolve_alias("Point").unwrap();
        assert_eq!(registry.traits_of(handle).unwrap().sealed_members, ["x"]);
        assert!(registry.resolve_alias("Bag").is_some());
    }

    #[test]
    fn handle_from_another_registry() {
        let larger = registry().register(Traits::dynamic("Extra"));
        let extra = larger.resolve_alias("Extra").unwrap();
        let record = larger.record("Extra", vec![]).unwrap();

        let smaller = registry();
        assert_eq!(smaller.get_alias(extra), None);
        assert_eq!(smaller.traits_of(extra), Err(Error::UnknownTypeHandle(2)));
        assert_eq!(
            smaller.instantiate(extra, vec![]),
            Err(Error::UnknownTypeHandle(2))
        );
        assert_eq!(
            dematerialize(&smaller, &record),
            Err(Error::UnknownTypeHandle(2))
        );
        assert!(dematerialize(&larger, &record).is_ok());
    }
}
