/// Flex remoting types
#[cfg(feature = "flex")]
pub mod flex;
