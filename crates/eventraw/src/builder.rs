use bytes::Bytes;

use crate::buffer::{ByteBuffer, EXPAND_BUF_SIZE};
use crate::decoded::DecodedEvent;
use crate::layout::{self, *};
use crate::param::{FromParamValue, Param, ParamValue};
use crate::stats;
use crate::types::{DecodeError, EncodeError};

/// Accumulates the header, optional trace info and custom parameters of one
/// event, and frames them into a [`Block`].
///
/// Setters take `&mut self`; share a builder across threads behind a mutex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBuilder {
    header: Header,
    trace_info: TraceInfo,
    params: Vec<Param>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(domain: &str, name: &str, event_type: i32) -> Self {
        let mut builder = Self::new();
        builder
            .append_domain(domain)
            .append_name(name)
            .append_type(event_type);
        builder
    }

    /// Rebuilds a builder from an encoded block.
    pub fn from_block(data: &[u8]) -> Result<Self, DecodeError> {
        let event = DecodedEvent::parse(data)?;
        Ok(Self::from(&event))
    }

    /// Compiles a flat JSON object into a builder.
    pub fn from_json(text: &str) -> Self {
        crate::json::compile(text)
    }

    pub fn is_base_info(key: &str) -> bool {
        layout::is_base_info(key)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn trace_info(&self) -> Option<&TraceInfo> {
        self.header.trace_opened.then_some(&self.trace_info)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn domain(&self) -> String {
        self.header.domain()
    }

    pub fn name(&self) -> String {
        self.header.name()
    }

    pub fn event_type(&self) -> i32 {
        self.header.event_type()
    }

    // === Header setters ===

    pub fn append_domain(&mut self, domain: &str) -> &mut Self {
        self.header.set_domain(domain);
        self
    }

    pub fn append_name(&mut self, name: &str) -> &mut Self {
        self.header.set_name(name);
        self
    }

    /// Sets the event type. Only types 1 through 4 are representable.
    pub fn append_type(&mut self, event_type: i32) -> &mut Self {
        if (1..=4).contains(&event_type) {
            self.header.set_event_type(event_type);
        } else {
            log::warn!("event type {} out of range, ignoring", event_type);
        }
        self
    }

    pub fn append_timestamp(&mut self, timestamp: u64) -> &mut Self {
        self.header.timestamp = timestamp;
        self
    }

    /// Sets the time zone from a `"+0800"` style offset.
    pub fn append_time_zone(&mut self, tz: &str) -> &mut Self {
        self.header.time_zone = parse_time_zone(tz);
        self
    }

    /// Sets the time zone from a table index.
    pub fn append_time_zone_index(&mut self, index: u8) -> &mut Self {
        self.header.time_zone = parse_time_zone(time_zone_name(index));
        self
    }

    pub fn append_uid(&mut self, uid: u32) -> &mut Self {
        self.header.uid = uid;
        self
    }

    pub fn append_pid(&mut self, pid: u32) -> &mut Self {
        self.header.pid = pid;
        self
    }

    pub fn append_tid(&mut self, tid: u32) -> &mut Self {
        self.header.tid = tid;
        self
    }

    pub fn append_id(&mut self, id: u64) -> &mut Self {
        self.header.id = id;
        self
    }

    pub fn append_trace_info(&mut self, info: TraceInfo) -> &mut Self {
        self.trace_info = info;
        self.header.trace_opened = true;
        self
    }

    // === Parameters ===

    /// Sets a value by key. Reserved keys update the header; any other key
    /// inserts a parameter or replaces the one already stored under that key.
    pub fn append_value(&mut self, key: &str, value: impl Into<ParamValue>) -> &mut Self {
        let value = value.into();
        if layout::is_base_info(key) {
            self.set_base_info(key, &value);
        } else {
            self.insert_param(Param::new(key, value));
        }
        self
    }

    pub fn append_param(&mut self, param: Param) -> &mut Self {
        if layout::is_base_info(param.key()) {
            let key = param.key().to_owned();
            self.set_base_info(&key, param.value());
        } else {
            self.insert_param(param);
        }
        self
    }

    fn insert_param(&mut self, param: Param) {
        match self.params.iter_mut().find(|p| p.key() == param.key()) {
            Some(slot) => *slot = param,
            None => self.params.push(param),
        }
    }

    pub fn param(&self, key: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.key() == key)
    }

    /// Looks up a value by key, reading reserved keys from the header.
    pub fn get_value(&self, key: &str) -> Option<ParamValue> {
        if layout::is_base_info(key) {
            return self.base_info_values(key).into_iter().next();
        }
        self.param(key).map(|p| p.value().clone())
    }

    /// Looks up a value by key and converts it to `T`.
    ///
    /// Reserved keys accept every representation of their header field:
    /// `tz_` as index or text, trace and span ids as integer or hex text.
    pub fn parse_value_by_key<T: FromParamValue>(&self, key: &str) -> Option<T> {
        if layout::is_base_info(key) {
            return self
                .base_info_values(key)
                .iter()
                .find_map(T::from_param_value);
        }
        self.param(key).and_then(|p| T::from_param_value(p.value()))
    }

    fn base_info_values(&self, key: &str) -> Vec<ParamValue> {
        let h = &self.header;
        let t = &self.trace_info;
        match key {
            KEY_DOMAIN => vec![h.domain().into()],
            KEY_NAME => vec![h.name().into()],
            KEY_TYPE => vec![ParamValue::Signed(h.event_type() as i64)],
            KEY_TIME_STAMP => vec![h.timestamp.into()],
            KEY_TIME_ZONE => vec![time_zone_name(h.time_zone).into(), h.time_zone.into()],
            KEY_PID => vec![h.pid.into()],
            KEY_TID => vec![h.tid.into()],
            KEY_UID => vec![h.uid.into()],
            KEY_ID => vec![h.id.into()],
            _ if !h.trace_opened => Vec::new(),
            KEY_TRACE_ID => vec![t.trace_id.into(), format!("{:x}", t.trace_id).into()],
            KEY_SPAN_ID => vec![t.span_id.into(), format!("{:x}", t.span_id).into()],
            KEY_PARENT_SPAN_ID => vec![t.pspan_id.into(), format!("{:x}", t.pspan_id).into()],
            KEY_TRACE_FLAG => vec![t.trace_flag.into()],
            _ => Vec::new(),
        }
    }

    fn set_base_info(&mut self, key: &str, value: &ParamValue) {
        let applied = match key {
            KEY_DOMAIN => value.as_str().map(|s| {
                self.append_domain(s);
            }),
            KEY_NAME => value.as_str().map(|s| {
                self.append_name(s);
            }),
            KEY_TYPE => signed_of(value).map(|t| {
                self.append_type(i32::try_from(t).unwrap_or(0));
            }),
            KEY_TIME_STAMP => unsigned_of(value, 10).map(|v| {
                self.append_timestamp(v);
            }),
            KEY_TIME_ZONE => match value {
                ParamValue::String(tz) => {
                    self.append_time_zone(tz);
                    Some(())
                }
                _ => unsigned_of(value, 10).map(|v| {
                    self.append_time_zone_index(u8::try_from(v).unwrap_or(u8::MAX));
                }),
            },
            KEY_PID => narrow(key, unsigned_of(value, 10)).map(|v| {
                self.append_pid(v);
            }),
            KEY_TID => narrow(key, unsigned_of(value, 10)).map(|v| {
                self.append_tid(v);
            }),
            KEY_UID => narrow(key, unsigned_of(value, 10)).map(|v| {
                self.append_uid(v);
            }),
            KEY_ID => unsigned_of(value, 10).map(|v| {
                self.append_id(v);
            }),
            KEY_TRACE_ID => unsigned_of(value, 16).map(|v| {
                self.trace_info.trace_id = v;
                self.header.trace_opened = true;
            }),
            KEY_SPAN_ID => narrow(key, unsigned_of(value, 16)).map(|v| {
                self.trace_info.span_id = v;
                self.header.trace_opened = true;
            }),
            KEY_PARENT_SPAN_ID => narrow(key, unsigned_of(value, 16)).map(|v| {
                self.trace_info.pspan_id = v;
                self.header.trace_opened = true;
            }),
            KEY_TRACE_FLAG => narrow(key, unsigned_of(value, 10)).map(|v| {
                self.trace_info.trace_flag = v;
                self.header.trace_opened = true;
            }),
            _ => None,
        };
        if applied.is_none() {
            log::debug!("ignoring value {:?} for base info key {}", value, key);
        }
    }

    // === Framing ===

    /// Frames the event into a new block.
    pub fn build(&self) -> Block {
        let mut buf = ByteBuffer::with_capacity(EXPAND_BUF_SIZE);
        let dropped = self.build_into(&mut buf);
        Block {
            data: buf.freeze(),
            dropped,
        }
    }

    /// Frames the event into `buf`, replacing its content. Returns the keys
    /// of parameters that could not be written.
    pub fn build_into(&self, buf: &mut ByteBuffer) -> Vec<String> {
        buf.reset();
        buf.append(&0i32.to_ne_bytes());
        buf.append(&self.header.to_bytes());
        if self.header.trace_opened {
            buf.append(&self.trace_info.to_bytes());
        }
        let count_pos = buf.len();
        buf.append(&0i32.to_ne_bytes());

        let mut written: i32 = 0;
        let mut dropped = Vec::new();
        for param in &self.params {
            let result = param.encode().and_then(|bytes| {
                let size = buf.len() + bytes.len();
                if size > MAX_BLOCK_SIZE {
                    return Err(EncodeError::BlockOverflow {
                        key: param.key().to_owned(),
                        size,
                    });
                }
                Ok(bytes)
            });
            match result {
                Ok(bytes) => {
                    buf.append(bytes);
                    written += 1;
                }
                Err(err) => {
                    log::error!("dropping parameter: {}", err);
                    dropped.push(param.key().to_owned());
                }
            }
        }

        let size = buf.len() as i32;
        // Both offsets lie inside the bytes written above.
        let count_patched = buf.update(&written.to_ne_bytes(), count_pos);
        let size_patched = buf.update(&size.to_ne_bytes(), 0);
        debug_assert!(count_patched && size_patched);
        stats::block_built(buf.len(), dropped.len());
        dropped
    }
}

impl From<&DecodedEvent> for EventBuilder {
    fn from(event: &DecodedEvent) -> Self {
        let mut builder = EventBuilder {
            header: event.header().clone(),
            ..Default::default()
        };
        if let Some(info) = event.trace_info() {
            builder.trace_info = *info;
        }
        for param in event.params() {
            builder.insert_param(param.clone());
        }
        builder
    }
}

fn unsigned_of(value: &ParamValue, radix: u32) -> Option<u64> {
    match value {
        ParamValue::Unsigned(v) => Some(*v),
        ParamValue::Signed(v) => u64::try_from(*v).ok(),
        ParamValue::String(s) => {
            let s = if radix == 16 {
                s.trim_start_matches("0x")
            } else {
                s.as_str()
            };
            u64::from_str_radix(s, radix).ok()
        }
        _ => None,
    }
}

fn signed_of(value: &ParamValue) -> Option<i64> {
    match value {
        ParamValue::Signed(v) => Some(*v),
        ParamValue::Unsigned(v) => i64::try_from(*v).ok(),
        ParamValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn narrow<T: TryFrom<u64>>(key: &str, value: Option<u64>) -> Option<T> {
    let value = value?;
    match T::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("value {} out of range for {}", value, key);
            None
        }
    }
}

/// One framed event: `[size][header][trace info?][count][params...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    data: Bytes,
    dropped: Vec<String>,
}

impl Block {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether every parameter made it into the block.
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }

    pub fn dropped_params(&self) -> &[String] {
        &self.dropped
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared_size(data: &[u8]) -> usize {
        i32::from_ne_bytes(data[..4].try_into().unwrap()) as usize
    }

    #[test]
    fn test_empty_block() {
        let block = EventBuilder::new().build();
        assert!(block.is_complete());
        assert_eq!(block.len(), min_block_size() + PARAM_COUNT_LEN);
        assert_eq!(declared_size(block.as_bytes()), block.len());
        assert_eq!(&block.as_bytes()[block.len() - 4..], &0i32.to_ne_bytes());
    }

    #[test]
    fn test_size_includes_trace_info() {
        let mut b = EventBuilder::with_base("D", "N", 1);
        b.append_value("K", 1u8);
        let plain = b.build();
        b.append_trace_info(TraceInfo {
            trace_flag: 1,
            trace_id: 2,
            span_id: 3,
            pspan_id: 4,
        });
        let traced = b.build();
        assert_eq!(traced.len(), plain.len() + TRACE_INFO_SIZE);
        assert_eq!(declared_size(traced.as_bytes()), traced.len());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut b = EventBuilder::new();
        b.append_value("A", 1u64)
            .append_value("B", "two")
            .append_value("C", 3.0f64)
            .append_value("B", vec![-2i64]);
        let keys: Vec<_> = b.params().iter().map(|p| p.key()).collect();
        assert_eq!(keys, ["A", "B", "C"]);
        assert_eq!(b.parse_value_by_key::<Vec<i64>>("B"), Some(vec![-2]));
        assert_eq!(b.parse_value_by_key::<String>("B"), None);
    }

    #[test]
    fn test_reserved_keys_route_to_header() {
        let mut b = EventBuilder::new();
        b.append_value(KEY_DOMAIN, "KERNEL")
            .append_value(KEY_NAME, "PANIC")
            .append_value(KEY_TYPE, 3i32)
            .append_value(KEY_TIME_STAMP, 1700000000000u64)
            .append_value(KEY_TIME_ZONE, "+0800")
            .append_value(KEY_PID, 10u32)
            .append_value(KEY_TID, "11")
            .append_value(KEY_UID, 12i64)
            .append_value(KEY_ID, "18446744073709551615");
        assert_eq!(b.param_count(), 0);
        assert_eq!(b.domain(), "KERNEL");
        assert_eq!(b.name(), "PANIC");
        assert_eq!(b.event_type(), 3);
        assert_eq!(b.header().timestamp, 1700000000000);
        assert_eq!(b.header().time_zone, 27);
        assert_eq!(b.header().pid, 10);
        assert_eq!(b.header().tid, 11);
        assert_eq!(b.header().uid, 12);
        assert_eq!(b.header().id, u64::MAX);
        assert!(b.trace_info().is_none());

        assert_eq!(b.parse_value_by_key::<String>(KEY_TIME_ZONE).as_deref(), Some("+0800"));
        assert_eq!(b.parse_value_by_key::<u8>(KEY_TIME_ZONE), Some(27));
        assert_eq!(b.parse_value_by_key::<i32>(KEY_TYPE), Some(3));
        assert_eq!(b.get_value(KEY_PID), Some(ParamValue::Unsigned(10)));
    }

    #[test]
    fn test_incompatible_reserved_values_ignored() {
        let mut b = EventBuilder::with_base("DOMAIN", "NAME", 2);
        b.append_value(KEY_DOMAIN, 5u64)
            .append_value(KEY_TYPE, 9i32)
            .append_value(KEY_PID, u64::MAX)
            .append_value(KEY_NAME, vec!["x"]);
        assert_eq!(b.domain(), "DOMAIN");
        assert_eq!(b.name(), "NAME");
        assert_eq!(b.event_type(), 2);
        assert_eq!(b.header().pid, 0);
    }

    #[test]
    fn test_trace_keys() {
        let mut b = EventBuilder::new();
        assert_eq!(b.get_value(KEY_TRACE_ID), None);
        b.append_value(KEY_TRACE_ID, "a92ab1ea12c7144")
            .append_value(KEY_SPAN_ID, "0x10")
            .append_value(KEY_PARENT_SPAN_ID, 7u32)
            .append_value(KEY_TRACE_FLAG, 1u8);
        let info = b.trace_info().copied().unwrap();
        assert_eq!(info.trace_id, 0x0a92ab1ea12c7144);
        assert_eq!(info.span_id, 0x10);
        assert_eq!(info.pspan_id, 7);
        assert_eq!(info.trace_flag, 1);
        assert_eq!(
            b.parse_value_by_key::<String>(KEY_TRACE_ID).as_deref(),
            Some("a92ab1ea12c7144")
        );
        assert_eq!(b.parse_value_by_key::<u32>(KEY_SPAN_ID), Some(0x10));
    }

    #[test]
    fn test_time_zone_fallback() {
        let mut b = EventBuilder::new();
        b.append_time_zone("+1110");
        assert_eq!(b.header().time_zone, DEFAULT_TIME_ZONE_INDEX);
        b.append_time_zone_index(3);
        assert_eq!(b.header().time_zone, 3);
        b.append_time_zone_index(200);
        assert_eq!(b.header().time_zone, DEFAULT_TIME_ZONE_INDEX);
        b.append_value(KEY_TIME_ZONE, 1000u64);
        assert_eq!(b.header().time_zone, DEFAULT_TIME_ZONE_INDEX);
    }

    #[test]
    fn test_oversized_param_dropped() {
        let mut b = EventBuilder::with_base("D", "N", 1);
        b.append_value("SMALL", 1u64)
            .append_value("HUGE", "x".repeat(MAX_BLOCK_SIZE))
            .append_value("HALF_A", "y".repeat(MAX_BLOCK_SIZE / 2))
            .append_value("HALF_B", "z".repeat(MAX_BLOCK_SIZE / 2))
            .append_value("TAIL", 2u64);
        let block = b.build();
        assert!(!block.is_complete());
        assert_eq!(block.dropped_params(), ["HUGE", "HALF_B"]);
        assert!(block.len() <= MAX_BLOCK_SIZE);
        assert_eq!(declared_size(block.as_bytes()), block.len());

        let event = DecodedEvent::parse(block.as_bytes()).unwrap();
        let keys: Vec<_> = event.params().iter().map(|p| p.key()).collect();
        assert_eq!(keys, ["SMALL", "HALF_A", "TAIL"]);
    }

    #[test]
    fn test_build_into_reuses_buffer() {
        let mut buf = ByteBuffer::new();
        buf.append(b"stale");
        let b = EventBuilder::with_base("D", "N", 1);
        assert!(b.build_into(&mut buf).is_empty());
        assert_eq!(buf.read(), b.build().as_bytes());

        // Size and count are patched even when the buffer held a longer block.
        buf.append(&[0xAA; 64]);
        let mut b = EventBuilder::with_base("D", "N", 1);
        b.append_value("A", 1u64).append_value("B", "two");
        assert!(b.build_into(&mut buf).is_empty());
        let data = buf.read();
        assert_eq!(declared_size(data), data.len());
        let count_pos = BLOCK_SIZE_LEN + HEADER_SIZE;
        let count = i32::from_ne_bytes(data[count_pos..count_pos + 4].try_into().unwrap());
        assert_eq!(count, 2);
    }

    #[test]
    fn test_from_block() {
        let mut b = EventBuilder::with_base("DEMO", "EV", 4);
        b.append_value("A", -1i64).append_value("S", vec!["p", "q"]);
        b.append_value(KEY_SPAN_ID, 9u32);
        let block = b.build();
        let back = EventBuilder::from_block(block.as_bytes()).unwrap();
        assert_eq!(back.build(), block);
        assert_eq!(back.trace_info().map(|t| t.span_id), Some(9));
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EventBuilder>();
        assert_send_sync::<Block>();
    }
}
