use super::Attribute;
use enumset::EnumSet;

/// The type descriptor shared by every object of one wire type
///
/// In AMF3 traits are sent once per reference scope and referenced by index afterwards, in AMF0
/// only the alias of typed objects is transmitted.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Traits {
    /// The class alias, empty for anonymous objects
    pub alias: String,

    /// The attributes on this trait
    pub attributes: EnumSet<Attribute>,

    /// The names of the members that are sent positionally, in wire order
    pub sealed_members: Vec<String>,
}

impl Default for Traits {
    /// An anonymous dynamic object, the shape of a plain `{}`
    fn default() -> Self {
        Self::dynamic("")
    }
}

impl Traits {
    /// Traits for a dynamic type, all members are sent as name / value pairs
    pub fn dynamic(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            attributes: Attribute::Dynamic.into(),
            sealed_members: Vec::new(),
        }
    }

    /// Traits for a type whose payload is written by an `ExternalCodec`
    pub fn externalizable(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            attributes: Attribute::External.into(),
            sealed_members: Vec::new(),
        }
    }

    /// Traits for a type with a fixed list of members
    pub fn sealed(alias: impl Into<String>, members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            alias: alias.into(),
            attributes: EnumSet::empty(),
            sealed_members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Does this type accept members beyond its sealed ones
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.attributes.contains(Attribute::Dynamic)
    }

    /// Is this type's payload an opaque externalized blob
    #[inline]
    pub fn is_externalizable(&self) -> bool {
        self.attributes.contains(Attribute::External)
    }

    /// Is this an anonymous (untyped) object
    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.alias.is_empty()
    }
}
