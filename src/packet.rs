//! Binary message container
//!
//! [`Packet`] is an append-only byte buffer paired with a sequential read
//! cursor. Typed writers encode scalars in network byte order and strings
//! with a 32-bit length prefix, so a packet built on one machine reads
//! back identically on any other. Reads never panic: running past the end
//! of the buffer latches the packet invalid, later reads return default
//! values, and [`Packet::clear`] is the only way back to a valid state.

use bytes::{BufMut, BytesMut};

/// A structured byte container for network messages.
///
/// Build a packet by writing values in order, hand it to a socket, and
/// read the values back in the same order on the receiving side. The
/// validity flag replaces per-read error checking: fill a whole record
/// with reads, then test [`Packet::is_valid`] once at the end.
///
/// # Examples
///
/// ```
/// use netpack::Packet;
///
/// let mut packet = Packet::new();
/// packet.write_u32(7);
/// packet.write_string("hello");
///
/// assert_eq!(packet.read_u32(), 7);
/// assert_eq!(packet.read_string(), "hello");
/// assert!(packet.is_valid());
/// assert!(packet.end_of_packet());
/// ```
#[derive(Debug, Clone)]
pub struct Packet {
    /// Accumulated message bytes.
    data: BytesMut,
    /// Next byte to read.
    read_pos: usize,
    /// Cleared by the first failed read; restored only by `clear`.
    valid: bool,
}

impl Packet {
    /// Create an empty packet.
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            read_pos: 0,
            valid: true,
        }
    }

    /// Create a packet over a copy of existing raw bytes, ready to read.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
            valid: true,
        }
    }

    /// Append raw bytes to the end of the packet. Empty input is a no-op.
    pub fn append(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.data.extend_from_slice(bytes);
        }
    }

    /// Reset to an empty, valid packet with the cursor at the start.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
        self.valid = true;
    }

    /// Number of bytes in the packet.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the packet contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Current read offset in bytes.
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Whether the read cursor has reached the end of the buffer.
    pub fn end_of_packet(&self) -> bool {
        self.read_pos >= self.data.len()
    }

    /// False once any read has run past the end of the buffer; only
    /// [`Packet::clear`] restores validity.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Serialization hook used by sockets: the bytes to put on the wire,
    /// without copying.
    pub fn on_send(&self) -> &[u8] {
        &self.data
    }

    /// Deserialization hook used by sockets: append bytes that arrived
    /// from the wire.
    pub fn on_receive(&mut self, bytes: &[u8]) {
        self.append(bytes);
    }

    /// Validate that `size` more bytes can be read.
    ///
    /// Sticky: once this fails the flag stays down and every later call
    /// short-circuits to false without re-checking.
    fn check_size(&mut self, size: usize) -> bool {
        self.valid = self.valid
            && self
                .read_pos
                .checked_add(size)
                .is_some_and(|end| end <= self.data.len());
        self.valid
    }

    /// Consume the next `N` bytes, or none at all if they are not there.
    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        if !self.check_size(N) {
            return None;
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.read_pos..self.read_pos + N]);
        self.read_pos += N;
        Some(bytes)
    }

    // ============ Writers ============

    /// Append a bool, encoded as a single byte.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.put_i16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.put_i64(value);
    }

    /// Append a float as its big-endian IEEE-754 bit pattern.
    pub fn write_f32(&mut self, value: f32) {
        self.data.put_f32(value);
    }

    /// Append a double as its big-endian IEEE-754 bit pattern.
    pub fn write_f64(&mut self, value: f64) {
        self.data.put_f64(value);
    }

    /// Append a string as a 32-bit byte count followed by raw UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Append a string as a 32-bit code-unit count followed by big-endian
    /// UTF-16 code units.
    pub fn write_wide_string(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_u32(units.len() as u32);
        for unit in units {
            self.data.put_u16(unit);
        }
    }

    /// Append a string as a 32-bit code-point count followed by big-endian
    /// 32-bit Unicode code points.
    pub fn write_unicode_string(&mut self, value: &str) {
        self.write_u32(value.chars().count() as u32);
        for point in value.chars() {
            self.data.put_u32(point as u32);
        }
    }

    // ============ Readers ============
    //
    // Every reader mirrors its writer exactly and returns a default value
    // once the packet is invalid.

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take_array().map_or(0, u8::from_be_bytes)
    }

    pub fn read_i8(&mut self) -> i8 {
        self.take_array().map_or(0, i8::from_be_bytes)
    }

    pub fn read_u16(&mut self) -> u16 {
        self.take_array().map_or(0, u16::from_be_bytes)
    }

    pub fn read_i16(&mut self) -> i16 {
        self.take_array().map_or(0, i16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> u32 {
        self.take_array().map_or(0, u32::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> i32 {
        self.take_array().map_or(0, i32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> u64 {
        self.take_array().map_or(0, u64::from_be_bytes)
    }

    pub fn read_i64(&mut self) -> i64 {
        self.take_array().map_or(0, i64::from_be_bytes)
    }

    pub fn read_f32(&mut self) -> f32 {
        self.take_array().map_or(0.0, f32::from_be_bytes)
    }

    pub fn read_f64(&mut self) -> f64 {
        self.take_array().map_or(0.0, f64::from_be_bytes)
    }

    /// Read a string written by [`Packet::write_string`]. Invalid UTF-8 is
    /// replaced, not rejected.
    pub fn read_string(&mut self) -> String {
        let length = self.read_u32() as usize;
        if length == 0 || !self.check_size(length) {
            return String::new();
        }
        let bytes = &self.data[self.read_pos..self.read_pos + length];
        let value = String::from_utf8_lossy(bytes).into_owned();
        self.read_pos += length;
        value
    }

    /// Read a string written by [`Packet::write_wide_string`].
    pub fn read_wide_string(&mut self) -> String {
        let length = self.read_u32() as usize;
        if length == 0 || !self.check_size(length.saturating_mul(2)) {
            return String::new();
        }
        let mut units = Vec::with_capacity(length);
        for _ in 0..length {
            units.push(self.read_u16());
        }
        String::from_utf16_lossy(&units)
    }

    /// Read a string written by [`Packet::write_unicode_string`].
    pub fn read_unicode_string(&mut self) -> String {
        let length = self.read_u32() as usize;
        if length == 0 || !self.check_size(length.saturating_mul(4)) {
            return String::new();
        }
        let mut value = String::with_capacity(length);
        for _ in 0..length {
            let point = self.read_u32();
            value.push(char::from_u32(point).unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        value
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}
