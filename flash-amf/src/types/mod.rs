mod amf_version;
mod attribute;
mod element;
mod traits;
mod value;

pub use amf_version::AMFVersion;
pub use attribute::Attribute;
pub use element::Element;
pub use traits::Traits;
pub use value::Value;
