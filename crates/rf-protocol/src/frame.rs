//! Inbound frame classification.
//!
//! Every line read from a client session is one frame: the liveness probe,
//! an HTTP request opening (a browser poking the control port), or a JSON
//! object. Anything else is malformed and gets the session rejected.

use crate::HEART;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The bare `HEART` probe; reply with `BEAT`.
    Heart,
    /// An HTTP request line. Served one static reply, then the session
    /// closes.
    Http,
    /// A JSON object frame.
    Json(Value),
    /// Unparseable or non-object input.
    Invalid,
}

impl Frame {
    pub fn classify(line: &str) -> Frame {
        if line == HEART {
            return Frame::Heart;
        }
        if line.contains(" HTTP/") {
            return Frame::Http;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => Frame::Json(value),
            _ => Frame::Invalid,
        }
    }
}
