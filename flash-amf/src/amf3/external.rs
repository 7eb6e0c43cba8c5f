use crate::amf3::read::AMF3Decoder;
use crate::amf3::write::AMF3Encoder;
use crate::errors::Error;
use crate::nom_utils::AMFResult;
use crate::types::{Element, Traits};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A trait to define encoding and decoding of externalizable types
///
/// The payload of an externalizable object is defined entirely by its class, a codec turns it into a
/// list of elements and back. Access to the decoder / encoder is given to allow reading nested AMF3
/// values with the caches of the current scope.
pub trait ExternalCodec {
    /// Read the payload of an object with the given traits
    fn decode<'a>(
        &self,
        i: &'a [u8],
        traits: &Traits,
        decoder: &mut AMF3Decoder,
    ) -> AMFResult<'a, Vec<Element>>;

    /// Produce the payload for the given elements
    fn encode(
        &self,
        elements: &[Element],
        traits: &Traits,
        encoder: &mut AMF3Encoder,
    ) -> Result<Vec<u8>, Error>;
}

/// The set of external codecs available to a decoder or encoder, keyed by class alias
#[derive(Clone, Default)]
pub struct ExternalRegistry {
    codecs: HashMap<String, Rc<dyn ExternalCodec>>,
}

impl ExternalRegistry {
    /// A registry with the codecs enabled by crate features (the flex wrappers with `flex`)
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::default();
        #[cfg(feature = "flex")]
        crate::extra::flex::register_codecs(&mut registry);
        registry
    }

    /// Register a codec for an alias, replacing any previous one
    pub fn register(&mut self, alias: impl Into<String>, codec: impl ExternalCodec + 'static) {
        self.codecs.insert(alias.into(), Rc::new(codec));
    }

    /// Get the codec for an alias
    pub fn get(&self, alias: &str) -> Option<Rc<dyn ExternalCodec>> {
        self.codecs.get(alias).cloned()
    }

    /// Is there a codec for this alias
    pub fn contains(&self, alias: &str) -> bool {
        self.codecs.contains_key(alias)
    }
}

impl fmt::Debug for ExternalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.codecs.keys()).finish()
    }
}
