use crate::types::{AMFVersion, Value};
use std::rc::Rc;

/// Reading of AMF Packets
pub mod read;

/// Writing of AMF Packets
pub mod write;

/// The routing string used where no URI applies, routing strings are never empty on the wire
pub const NULL_URI: &str = "null";

/// An AMF Packet Header
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// The name of this header.
    pub name: String,

    /// If true, the endpoint must immediately abort and error if it does not understand this header.
    pub must_understand: bool,

    /// The value of this header.
    pub value: Rc<Value>,
}

/// An AMF Packet Message
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The target URI that this message is intended for.
    pub target_uri: String,

    /// The response URI for this message.
    ///
    /// For requests, this should be a unique identifier to represent "this message", for example `/1`.
    /// Responses will target this URI, suffixed with either `/onResult` or `/onStatus` (for success or failure).
    ///
    /// For responses this is [`NULL_URI`].
    pub response_uri: String,

    /// The contents of this message.
    pub contents: Rc<Value>,
}

impl Message {
    /// Build the successful reply to this message
    pub fn result(&self, contents: impl Into<Rc<Value>>) -> Self {
        self.reply("onResult", contents.into())
    }

    /// Build the failure reply to this message
    pub fn status(&self, contents: impl Into<Rc<Value>>) -> Self {
        self.reply("onStatus", contents.into())
    }

    fn reply(&self, suffix: &str, contents: Rc<Value>) -> Self {
        Self {
            target_uri: format!("{}/{}", self.response_uri, suffix),
            response_uri: NULL_URI.to_string(),
            contents,
        }
    }
}

/// An AMF Packet
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// The version of this packet.
    ///
    /// Bodies always start in AMF0. In AMF3 packets every header and message value is escaped to
    /// AMF3, and decoding removes the escape again.
    pub version: AMFVersion,

    /// Any headers associated with every message inside this packet.
    pub headers: Vec<Header>,

    /// All messages included inside this packet.
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::{Message, NULL_URI};
    use crate::types::Value;
    use std::rc::Rc;

    #[test]
    fn reply_targets() {
        let request = Message {
            target_uri: "rpc.echo".to_string(),
            response_uri: "/1".to_string(),
            contents: Rc::new(Value::Null),
        };

        let ok = request.result(Value::from("hi"));
        assert_eq!(ok.target_uri, "/1/onResult");
        assert_eq!(ok.response_uri, NULL_URI);
        assert_eq!(*ok.contents, Value::from("hi"));

        let failed = request.status(Rc::new(Value::Null));
        assert_eq!(failed.target_uri, "/1/onStatus");
    }
}
