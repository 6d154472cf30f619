//! Fixed-size records of the raw event block and the framing constants.
//!
//! All records are packed by hand; multi-byte integers use the native byte
//! order of the process, matching the producer and consumer of a block.

/// Maximum length of the event domain, excluding the NUL terminator.
pub const MAX_DOMAIN_LENGTH: usize = 16;

/// Maximum length of the event name, excluding the NUL terminator.
pub const MAX_EVENT_NAME_LENGTH: usize = 32;

/// Largest block accepted by the decoder.
pub const MAX_BLOCK_SIZE: usize = 384 * 1024;

/// Array parameters keep at most this many elements.
pub const MAX_ARRAY_SIZE: usize = 100;

/// Width of the leading block size field.
pub const BLOCK_SIZE_LEN: usize = 4;

/// Width of the parameter count field.
pub const PARAM_COUNT_LEN: usize = 4;

/// Size of a packed [`Header`].
pub const HEADER_SIZE: usize = DOMAIN_FIELD_LEN + NAME_FIELD_LEN + 8 + 1 + 4 + 4 + 4 + 8 + 1;

/// Size of a packed [`TraceInfo`].
pub const TRACE_INFO_SIZE: usize = 1 + 8 + 4 + 4;

/// Size of a packed [`TypeTag`].
pub const TYPE_TAG_SIZE: usize = 1;

const DOMAIN_FIELD_LEN: usize = MAX_DOMAIN_LENGTH + 1;
const NAME_FIELD_LEN: usize = MAX_EVENT_NAME_LENGTH + 1;

/// The smallest number of bytes a block can occupy: the size field and the header.
pub const fn min_block_size() -> usize {
    BLOCK_SIZE_LEN + HEADER_SIZE
}

// Reserved base info keys.
pub const KEY_DOMAIN: &str = "domain_";
pub const KEY_NAME: &str = "name_";
pub const KEY_TYPE: &str = "type_";
pub const KEY_TIME_STAMP: &str = "time_";
pub const KEY_TIME_ZONE: &str = "tz_";
pub const KEY_PID: &str = "pid_";
pub const KEY_TID: &str = "tid_";
pub const KEY_UID: &str = "uid_";
pub const KEY_ID: &str = "id_";
pub const KEY_TRACE_ID: &str = "trace_id_";
pub const KEY_SPAN_ID: &str = "span_id_";
pub const KEY_PARENT_SPAN_ID: &str = "pspan_id_";
pub const KEY_TRACE_FLAG: &str = "trace_flag_";

pub const BASE_INFO_KEYS: [&str; 13] = [
    KEY_DOMAIN,
    KEY_NAME,
    KEY_TYPE,
    KEY_TIME_STAMP,
    KEY_TIME_ZONE,
    KEY_ID,
    KEY_PID,
    KEY_TID,
    KEY_UID,
    KEY_TRACE_ID,
    KEY_SPAN_ID,
    KEY_PARENT_SPAN_ID,
    KEY_TRACE_FLAG,
];

/// Reports whether `key` names a header field rather than a custom parameter.
pub fn is_base_info(key: &str) -> bool {
    BASE_INFO_KEYS.contains(&key)
}

/// Marker stored in the two high bits of a varint's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncodeType {
    Varint = 0,
    LengthDelimited = 1,
}

/// Value type carried by a [`TypeTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Unknown = 0,
    Bool = 1,
    Int8 = 2,
    UInt8 = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
}

impl ValueType {
    pub fn from_u8(v: u8) -> Option<ValueType> {
        Some(match v {
            0 => ValueType::Unknown,
            1 => ValueType::Bool,
            2 => ValueType::Int8,
            3 => ValueType::UInt8,
            4 => ValueType::Int16,
            5 => ValueType::UInt16,
            6 => ValueType::Int32,
            7 => ValueType::UInt32,
            8 => ValueType::Int64,
            9 => ValueType::UInt64,
            10 => ValueType::Float,
            11 => ValueType::Double,
            12 => ValueType::String,
            _ => return None,
        })
    }
}

/// Per-parameter type record: `isArray:1 valueType:4 valueByteCount:3`,
/// packed into a single byte from the least significant bit up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTag {
    pub is_array: bool,
    pub value_type: ValueType,
    pub value_byte_cnt: u8,
}

impl TypeTag {
    pub fn new(is_array: bool, value_type: ValueType) -> Self {
        Self {
            is_array,
            value_type,
            value_byte_cnt: 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.is_array as u8) | ((self.value_type as u8 & 0x0F) << 1) | ((self.value_byte_cnt & 0x07) << 5)
    }

    /// Unpacks a tag byte. Returns the raw value type on failure.
    pub fn from_byte(b: u8) -> Result<Self, u8> {
        let raw_type = (b >> 1) & 0x0F;
        let value_type = ValueType::from_u8(raw_type).ok_or(raw_type)?;
        Ok(Self {
            is_array: b & 0x01 == 1,
            value_type,
            value_byte_cnt: (b >> 5) & 0x07,
        })
    }
}

/// The fixed base info record at the start of every block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub(crate) domain: [u8; DOMAIN_FIELD_LEN],
    pub(crate) name: [u8; NAME_FIELD_LEN],
    pub timestamp: u64,
    pub time_zone: u8,
    pub uid: u32,
    pub pid: u32,
    pub tid: u32,
    pub id: u64,
    /// Event type minus one; only two bits are persisted.
    pub(crate) raw_type: u8,
    pub(crate) trace_opened: bool,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            domain: [0; DOMAIN_FIELD_LEN],
            name: [0; NAME_FIELD_LEN],
            timestamp: 0,
            time_zone: 0,
            uid: 0,
            pid: 0,
            tid: 0,
            id: 0,
            raw_type: 0,
            trace_opened: false,
        }
    }
}

impl Header {
    pub fn domain(&self) -> String {
        c_str(&self.domain[..MAX_DOMAIN_LENGTH])
    }

    pub fn name(&self) -> String {
        c_str(&self.name[..MAX_EVENT_NAME_LENGTH])
    }

    pub(crate) fn set_domain(&mut self, domain: &str) {
        copy_c_str(&mut self.domain, domain.as_bytes());
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        copy_c_str(&mut self.name, name.as_bytes());
    }

    /// The event type as seen by callers (1..=4).
    pub fn event_type(&self) -> i32 {
        self.raw_type as i32 + 1
    }

    /// The event type exactly as stored in the two wire bits.
    pub fn raw_type(&self) -> u8 {
        self.raw_type
    }

    pub(crate) fn set_event_type(&mut self, event_type: i32) {
        self.raw_type = (event_type - 1) as u8 & 0x03;
    }

    pub fn is_trace_opened(&self) -> bool {
        self.trace_opened
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut w = FieldWriter::new(&mut out);
        w.put(&self.domain);
        w.put(&self.name);
        w.put(&self.timestamp.to_ne_bytes());
        w.put(&[self.time_zone]);
        w.put(&self.uid.to_ne_bytes());
        w.put(&self.pid.to_ne_bytes());
        w.put(&self.tid.to_ne_bytes());
        w.put(&self.id.to_ne_bytes());
        w.put(&[(self.raw_type & 0x03) | ((self.trace_opened as u8) << 2)]);
        out
    }

    pub fn from_bytes(b: &[u8; HEADER_SIZE]) -> Self {
        let mut r = FieldReader::new(b);
        let domain = r.array();
        let name = r.array();
        let timestamp = u64::from_ne_bytes(r.array());
        let time_zone = r.array::<1>()[0];
        let uid = u32::from_ne_bytes(r.array());
        let pid = u32::from_ne_bytes(r.array());
        let tid = u32::from_ne_bytes(r.array());
        let id = u64::from_ne_bytes(r.array());
        let flags = r.array::<1>()[0];
        Self {
            domain,
            name,
            timestamp,
            time_zone,
            uid,
            pid,
            tid,
            id,
            raw_type: flags & 0x03,
            trace_opened: (flags >> 2) & 0x01 == 1,
        }
    }
}

/// Distributed tracing context, present only when the header's trace flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceInfo {
    pub trace_flag: u8,
    pub trace_id: u64,
    pub span_id: u32,
    pub pspan_id: u32,
}

impl TraceInfo {
    pub fn to_bytes(&self) -> [u8; TRACE_INFO_SIZE] {
        let mut out = [0u8; TRACE_INFO_SIZE];
        let mut w = FieldWriter::new(&mut out);
        w.put(&[self.trace_flag]);
        w.put(&self.trace_id.to_ne_bytes());
        w.put(&self.span_id.to_ne_bytes());
        w.put(&self.pspan_id.to_ne_bytes());
        out
    }

    pub fn from_bytes(b: &[u8; TRACE_INFO_SIZE]) -> Self {
        let mut r = FieldReader::new(b);
        Self {
            trace_flag: r.array::<1>()[0],
            trace_id: u64::from_ne_bytes(r.array()),
            span_id: u32::from_ne_bytes(r.array()),
            pspan_id: u32::from_ne_bytes(r.array()),
        }
    }
}

struct FieldWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self { out, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.out[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

/// Copies `src` into a NUL-padded slot, truncating to leave room for the terminator.
fn copy_c_str(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len() - 1);
    dst.fill(0);
    dst[..n].copy_from_slice(&src[..n]);
}

fn c_str(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

// === Time zones ===

const TIME_ZONES: [&str; 38] = [
    "-0100", "-0200", "-0230", "-0300", "-0330", "-0400", "-0500", "-0600", "-0700", "-0800",
    "-0900", "-0930", "-1000", "-1100", "+0000", "+0100", "+0200", "+0300", "+0330", "+0400",
    "+0430", "+0500", "+0530", "+0545", "+0600", "+0630", "+0700", "+0800", "+0845", "+0900",
    "+0930", "+1000", "+1030", "+1100", "+1200", "+1245", "+1300", "+1400",
];

/// Index of `"+0000"`, used for unknown offsets.
pub const DEFAULT_TIME_ZONE_INDEX: u8 = 14;

/// Converts a `"+0800"` style offset to its table index.
pub fn parse_time_zone(tz: &str) -> u8 {
    TIME_ZONES
        .iter()
        .position(|&z| z == tz)
        .map(|i| i as u8)
        .unwrap_or(DEFAULT_TIME_ZONE_INDEX)
}

/// Converts a table index back to its textual offset.
pub fn time_zone_name(index: u8) -> &'static str {
    TIME_ZONES
        .get(index as usize)
        .copied()
        .unwrap_or(TIME_ZONES[DEFAULT_TIME_ZONE_INDEX as usize])
}
