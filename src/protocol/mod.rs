//! # Protocol Module
//!
//! This module defines the wire unit of the HTSP protocol and its binary
//! encoding.
//!
//! ## Protocol Overview
//!
//! Every request, reply and server-initiated event is a [`Message`]: a map
//! from field name to a typed [`Value`]. Requests carry a `method` field,
//! replies echo the request's `seq`, and subscription events carry the
//! client-chosen `subscriptionId`.
//!
//! On the wire each message is sent as one frame:
//!
//! ```text
//! +-----------+----------------------------------------------+
//! | Length    | Body: field, field, ...                      |
//! | u32 BE    |                                              |
//! +-----------+----------------------------------------------+
//!
//! field:
//! +------+----------+----------+------------+-----------------+
//! | Type | Name len | Data len | Name       | Data            |
//! | u8   | u8       | u32 BE   | (name len) | (data len)      |
//! +------+----------+----------+------------+-----------------+
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tokio_htsp::protocol::{self, Message};
//!
//! let hello = Message::method("hello")
//!     .with("htspversion", 23)
//!     .with("clientname", "tokio-htsp");
//!
//! let frame = protocol::encode_frame(&hello).unwrap();
//! let decoded = protocol::decode_body(&frame[protocol::HEADER_SIZE..]).unwrap();
//! assert_eq!(decoded, hello);
//! ```

mod codec;
mod message;

pub use codec::{HEADER_SIZE, decode_body, decode_frame, encode_body, encode_frame};
pub use message::{Message, Value, ValueKind};
