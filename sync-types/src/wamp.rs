//! WAMP v2 wire messages.
//!
//! Every message is a positional array whose first element is the message
//! code. The same [`Message`] value encodes under both negotiated
//! serializations ([`Serialization::MsgPack`] and [`Serialization::Json`]).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::DecodeError;

/// Positional call/event arguments.
pub type Args = Vec<Value>;
/// Keyword call/event arguments.
pub type Kwargs = Map<String, Value>;
/// Options and details dictionaries.
pub type Dict = Map<String, Value>;

/// Close reason for a deliberate, requested shutdown.
pub const CLOSE_NORMAL: &str = "wamp.close.normal";
/// Close reason used to acknowledge a peer's GOODBYE.
pub const CLOSE_GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";

/// Message code discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageCode {
    /// Client opens a session
    Hello = 1,
    /// Router accepts a session
    Welcome = 2,
    /// Session opening rejected
    Abort = 3,
    /// Session close, either direction
    Goodbye = 6,
    /// Request failed
    Error = 8,
    /// Subscribe to a topic
    Subscribe = 32,
    /// Subscription acknowledged
    Subscribed = 33,
    /// Drop a subscription
    Unsubscribe = 34,
    /// Unsubscription acknowledged
    Unsubscribed = 35,
    /// Publication delivered to a subscriber
    Event = 36,
    /// Remote procedure call
    Call = 48,
    /// Cancel an outstanding call
    Cancel = 49,
    /// Call result
    Result = 50,
}

impl TryFrom<u64> for MessageCode {
    type Error = DecodeError;

    fn try_from(value: u64) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(MessageCode::Hello),
            2 => Ok(MessageCode::Welcome),
            3 => Ok(MessageCode::Abort),
            6 => Ok(MessageCode::Goodbye),
            8 => Ok(MessageCode::Error),
            32 => Ok(MessageCode::Subscribe),
            33 => Ok(MessageCode::Subscribed),
            34 => Ok(MessageCode::Unsubscribe),
            35 => Ok(MessageCode::Unsubscribed),
            36 => Ok(MessageCode::Event),
            48 => Ok(MessageCode::Call),
            49 => Ok(MessageCode::Cancel),
            50 => Ok(MessageCode::Result),
            _ => Err(DecodeError::InvalidMessageType(value)),
        }
    }
}

/// All WAMP messages this client sends or understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `[HELLO, Realm, Details]`
    Hello { realm: String, details: Dict },
    /// `[WELCOME, Session, Details]`
    Welcome { session: u64, details: Dict },
    /// `[ABORT, Details, Reason]`
    Abort { details: Dict, reason: String },
    /// `[GOODBYE, Details, Reason]`
    Goodbye { details: Dict, reason: String },
    /// `[ERROR, Request.Type, Request, Details, Error, Args?, Kwargs?]`
    Error {
        request_type: u64,
        request: u64,
        details: Dict,
        error: String,
        args: Args,
        kwargs: Kwargs,
    },
    /// `[SUBSCRIBE, Request, Options, Topic]`
    Subscribe {
        request: u64,
        options: Dict,
        topic: String,
    },
    /// `[SUBSCRIBED, Request, Subscription]`
    Subscribed { request: u64, subscription: u64 },
    /// `[UNSUBSCRIBE, Request, Subscription]`
    Unsubscribe { request: u64, subscription: u64 },
    /// `[UNSUBSCRIBED, Request]`
    Unsubscribed { request: u64 },
    /// `[EVENT, Subscription, Publication, Details, Args?, Kwargs?]`
    Event {
        subscription: u64,
        publication: u64,
        details: Dict,
        args: Args,
        kwargs: Kwargs,
    },
    /// `[CALL, Request, Options, Procedure, Args?, Kwargs?]`
    Call {
        request: u64,
        options: Dict,
        procedure: String,
        args: Args,
        kwargs: Kwargs,
    },
    /// `[CANCEL, Request, Options]`
    Cancel { request: u64, options: Dict },
    /// `[RESULT, Request, Details, Args?, Kwargs?]`
    Result {
        request: u64,
        details: Dict,
        args: Args,
        kwargs: Kwargs,
    },
}

impl Message {
    /// The message code of this message.
    pub fn code(&self) -> MessageCode {
        match self {
            Message::Hello { .. } => MessageCode::Hello,
            Message::Welcome { .. } => MessageCode::Welcome,
            Message::Abort { .. } => MessageCode::Abort,
            Message::Goodbye { .. } => MessageCode::Goodbye,
            Message::Error { .. } => MessageCode::Error,
            Message::Subscribe { .. } => MessageCode::Subscribe,
            Message::Subscribed { .. } => MessageCode::Subscribed,
            Message::Unsubscribe { .. } => MessageCode::Unsubscribe,
            Message::Unsubscribed { .. } => MessageCode::Unsubscribed,
            Message::Event { .. } => MessageCode::Event,
            Message::Call { .. } => MessageCode::Call,
            Message::Cancel { .. } => MessageCode::Cancel,
            Message::Result { .. } => MessageCode::Result,
        }
    }

    /// HELLO announcing the subscriber and caller roles.
    pub fn hello(realm: &str) -> Self {
        let mut roles = Dict::new();
        roles.insert("subscriber".into(), Value::Object(Dict::new()));
        roles.insert("caller".into(), Value::Object(Dict::new()));
        let mut details = Dict::new();
        details.insert("roles".into(), Value::Object(roles));
        Message::Hello {
            realm: realm.to_string(),
            details,
        }
    }

    /// GOODBYE with the given reason and empty details.
    pub fn goodbye(reason: &str) -> Self {
        Message::Goodbye {
            details: Dict::new(),
            reason: reason.to_string(),
        }
    }

    fn to_frame(&self) -> Vec<Value> {
        let code = Value::from(self.code() as u8);
        match self {
            Message::Hello { realm, details } => {
                vec![code, Value::from(realm.as_str()), dict(details)]
            }
            Message::Welcome { session, details } => {
                vec![code, Value::from(*session), dict(details)]
            }
            Message::Abort { details, reason } | Message::Goodbye { details, reason } => {
                vec![code, dict(details), Value::from(reason.as_str())]
            }
            Message::Error {
                request_type,
                request,
                details,
                error,
                args,
                kwargs,
            } => with_payload(
                vec![
                    code,
                    Value::from(*request_type),
                    Value::from(*request),
                    dict(details),
                    Value::from(error.as_str()),
                ],
                args,
                kwargs,
            ),
            Message::Subscribe {
                request,
                options,
                topic,
            } => vec![
                code,
                Value::from(*request),
                dict(options),
                Value::from(topic.as_str()),
            ],
            Message::Subscribed {
                request,
                subscription,
            }
            | Message::Unsubscribe {
                request,
                subscription,
            } => vec![code, Value::from(*request), Value::from(*subscription)],
            Message::Unsubscribed { request } => vec![code, Value::from(*request)],
            Message::Event {
                subscription,
                publication,
                details,
                args,
                kwargs,
            } => with_payload(
                vec![
                    code,
                    Value::from(*subscription),
                    Value::from(*publication),
                    dict(details),
                ],
                args,
                kwargs,
            ),
            Message::Call {
                request,
                options,
                procedure,
                args,
                kwargs,
            } => with_payload(
                vec![
                    code,
                    Value::from(*request),
                    dict(options),
                    Value::from(procedure.as_str()),
                ],
                args,
                kwargs,
            ),
            Message::Cancel { request, options } => {
                vec![code, Value::from(*request), dict(options)]
            }
            Message::Result {
                request,
                details,
                args,
                kwargs,
            } => with_payload(
                vec![code, Value::from(*request), dict(details)],
                args,
                kwargs,
            ),
        }
    }

    fn from_frame(frame: Vec<Value>) -> Result<Self, DecodeError> {
        let mut fields = Fields::new(frame);
        let code = MessageCode::try_from(fields.u64("code")?)?;
        let message = match code {
            MessageCode::Hello => Message::Hello {
                realm: fields.string("realm")?,
                details: fields.dict("details")?,
            },
            MessageCode::Welcome => Message::Welcome {
                session: fields.u64("session")?,
                details: fields.dict("details")?,
            },
            MessageCode::Abort => Message::Abort {
                details: fields.dict("details")?,
                reason: fields.string("reason")?,
            },
            MessageCode::Goodbye => Message::Goodbye {
                details: fields.dict("details")?,
                reason: fields.string("reason")?,
            },
            MessageCode::Error => Message::Error {
                request_type: fields.u64("request type")?,
                request: fields.u64("request")?,
                details: fields.dict("details")?,
                error: fields.string("error")?,
                args: fields.args()?,
                kwargs: fields.kwargs()?,
            },
            MessageCode::Subscribe => Message::Subscribe {
                request: fields.u64("request")?,
                options: fields.dict("options")?,
                topic: fields.string("topic")?,
            },
            MessageCode::Subscribed => Message::Subscribed {
                request: fields.u64("request")?,
                subscription: fields.u64("subscription")?,
            },
            MessageCode::Unsubscribe => Message::Unsubscribe {
                request: fields.u64("request")?,
                subscription: fields.u64("subscription")?,
            },
            MessageCode::Unsubscribed => Message::Unsubscribed {
                request: fields.u64("request")?,
            },
            MessageCode::Event => Message::Event {
                subscription: fields.u64("subscription")?,
                publication: fields.u64("publication")?,
                details: fields.dict("details")?,
                args: fields.args()?,
                kwargs: fields.kwargs()?,
            },
            MessageCode::Call => Message::Call {
                request: fields.u64("request")?,
                options: fields.dict("options")?,
                procedure: fields.string("procedure")?,
                args: fields.args()?,
                kwargs: fields.kwargs()?,
            },
            MessageCode::Cancel => Message::Cancel {
                request: fields.u64("request")?,
                options: fields.dict("options")?,
            },
            MessageCode::Result => Message::Result {
                request: fields.u64("request")?,
                details: fields.dict("details")?,
                args: fields.args()?,
                kwargs: fields.kwargs()?,
            },
        };
        Ok(message)
    }
}

fn dict(map: &Dict) -> Value {
    Value::Object(map.clone())
}

// Trailing payload elements are omitted when empty, as WAMP peers expect.
fn with_payload(mut frame: Vec<Value>, args: &Args, kwargs: &Kwargs) -> Vec<Value> {
    if !args.is_empty() || !kwargs.is_empty() {
        frame.push(Value::Array(args.clone()));
    }
    if !kwargs.is_empty() {
        frame.push(Value::Object(kwargs.clone()));
    }
    frame
}

/// Positional reader over a decoded frame.
struct Fields {
    inner: std::vec::IntoIter<Value>,
}

impl Fields {
    fn new(frame: Vec<Value>) -> Self {
        Self {
            inner: frame.into_iter(),
        }
    }

    fn next(&mut self, name: &str) -> Result<Value, DecodeError> {
        self.inner
            .next()
            .ok_or_else(|| DecodeError::InvalidMessage(format!("missing {}", name)))
    }

    fn u64(&mut self, name: &str) -> Result<u64, DecodeError> {
        self.next(name)?
            .as_u64()
            .ok_or_else(|| DecodeError::InvalidMessage(format!("{} is not an id", name)))
    }

    fn string(&mut self, name: &str) -> Result<String, DecodeError> {
        match self.next(name)? {
            Value::String(s) => Ok(s),
            _ => Err(DecodeError::InvalidMessage(format!("{} is not a string", name))),
        }
    }

    fn dict(&mut self, name: &str) -> Result<Dict, DecodeError> {
        match self.next(name)? {
            Value::Object(map) => Ok(map),
            _ => Err(DecodeError::InvalidMessage(format!("{} is not a dict", name))),
        }
    }

    fn args(&mut self) -> Result<Args, DecodeError> {
        match self.inner.next() {
            None | Some(Value::Null) => Ok(Args::new()),
            Some(Value::Array(args)) => Ok(args),
            Some(_) => Err(DecodeError::InvalidMessage("arguments is not a list".into())),
        }
    }

    fn kwargs(&mut self) -> Result<Kwargs, DecodeError> {
        match self.inner.next() {
            None | Some(Value::Null) => Ok(Kwargs::new()),
            Some(Value::Object(kwargs)) => Ok(kwargs),
            Some(_) => Err(DecodeError::InvalidMessage("keyword arguments is not a dict".into())),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_frame().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let frame = Vec::<Value>::deserialize(deserializer)?;
        Message::from_frame(frame).map_err(serde::de::Error::custom)
    }
}

/// A negotiable wire serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serialization {
    /// `wamp.2.msgpack`, sent as binary frames
    MsgPack,
    /// `wamp.2.json`, sent as text frames
    Json,
}

impl Serialization {
    /// WebSocket subprotocol name for this serialization.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Serialization::MsgPack => "wamp.2.msgpack",
            Serialization::Json => "wamp.2.json",
        }
    }

    /// Look up a serialization by its subprotocol name.
    pub fn from_subprotocol(name: &str) -> Option<Self> {
        match name.trim() {
            "wamp.2.msgpack" => Some(Serialization::MsgPack),
            "wamp.2.json" => Some(Serialization::Json),
            _ => None,
        }
    }

    /// Whether frames are binary (otherwise UTF-8 text).
    pub fn is_binary(&self) -> bool {
        matches!(self, Serialization::MsgPack)
    }

    /// Encode a message to frame bytes.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, DecodeError> {
        match self {
            Serialization::MsgPack => rmp_serde::to_vec(message).map_err(DecodeError::Serialization),
            Serialization::Json => Ok(serde_json::to_vec(message)?),
        }
    }

    /// Decode frame bytes into a message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError> {
        match self {
            Serialization::MsgPack => {
                rmp_serde::from_slice(bytes).map_err(DecodeError::Deserialization)
            }
            Serialization::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
