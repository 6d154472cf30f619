//! Binary codec for system events.
//!
//! An event is a fixed header, optional tracing context and a list of named,
//! typed custom parameters. This crate builds such events into size-prefixed
//! raw blocks, decodes blocks back and renders them as flat JSON. It can also
//! compile a flat JSON object straight into a block builder.
//!
//! # Block layout
//!
//! Multi-byte fixed-width integers use the native byte order.
//!
//! | Offset | Size | Field                                          |
//! |--------|------|------------------------------------------------|
//! | 0      | 4    | Block size, including this field (i32)         |
//! | 4      | 17   | Domain, NUL padded                             |
//! | 21     | 33   | Event name, NUL padded                         |
//! | 54     | 8    | Timestamp (u64)                                |
//! | 62     | 1    | Time zone index                                |
//! | 63     | 4    | uid                                            |
//! | 67     | 4    | pid                                            |
//! | 71     | 4    | tid                                            |
//! | 75     | 8    | Event id                                       |
//! | 83     | 1    | Flags: bits 0-1 type-1, bit 2 trace info       |
//! | 84     | 17   | Trace info, only when the trace flag is set    |
//! | ..     | 4    | Parameter count (i32)                          |
//! | ..     | N    | Parameters                                     |
//!
//! Each parameter is `key`, a one byte type tag and a varint coded payload.
//!
//! # Usage
//!
//! ```
//! use sysevent_raw::{DecodedEvent, EventBuilder};
//!
//! let mut builder = EventBuilder::with_base("KERNEL", "BOOT_DONE", 4);
//! builder.append_value("DURATION_MS", 1250u64).append_value("STAGE", "init");
//! let block = builder.build();
//!
//! let event = DecodedEvent::parse(block.as_bytes()).unwrap();
//! assert_eq!(event.name(), "BOOT_DONE");
//! assert!(event.as_json().ends_with(r#""DURATION_MS":1250,"STAGE":"init"}"#));
//! ```

mod buffer;
mod builder;
mod decoded;
mod json;
mod layout;
mod param;
mod reader;
pub mod stats;
pub mod types;

pub use buffer::{ByteBuffer, EXPAND_BUF_SIZE};
pub use builder::{Block, EventBuilder};
pub use decoded::DecodedEvent;
pub use json::{compile, JsonCompiler};
pub use layout::{
    is_base_info, min_block_size, parse_time_zone, time_zone_name, EncodeType, Header, TraceInfo,
    TypeTag, ValueType, BASE_INFO_KEYS, BLOCK_SIZE_LEN, DEFAULT_TIME_ZONE_INDEX, HEADER_SIZE,
    KEY_DOMAIN, KEY_ID, KEY_NAME, KEY_PARENT_SPAN_ID, KEY_PID, KEY_SPAN_ID, KEY_TID,
    KEY_TIME_STAMP, KEY_TIME_ZONE, KEY_TRACE_FLAG, KEY_TRACE_ID, KEY_TYPE, KEY_UID,
    MAX_ARRAY_SIZE, MAX_BLOCK_SIZE, MAX_DOMAIN_LENGTH, MAX_EVENT_NAME_LENGTH, PARAM_COUNT_LEN,
    TRACE_INFO_SIZE, TYPE_TAG_SIZE,
};
pub use param::{DataCodedType, FromParamValue, Param, ParamValue};
pub use types::{DecodeError, EncodeError};
