//!
//! Message body variants.
//!
//! Bytes and stream bodies are write-only when created or cleared and become read-only once
//! [`reset`](BytesBody::reset), which a provider does when the message is sent or delivered.
//!
use crate::error::JmsError;
use crate::property::PropertyValue;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub enum MessageBody {
    /// A message carrying only headers and properties.
    #[default]
    Empty,
    Text(Option<String>),
    Bytes(BytesBody),
    Map(MapBody),
    /// Serialized application object.
    Object(Option<serde_json::Value>),
    Stream(StreamBody),
}

impl MessageBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::Empty => "empty",
            MessageBody::Text(_) => "text",
            MessageBody::Bytes(_) => "bytes",
            MessageBody::Map(_) => "map",
            MessageBody::Object(_) => "object",
            MessageBody::Stream(_) => "stream",
        }
    }

    /// An empty body of the same variant.
    pub(crate) fn cleared(&self) -> MessageBody {
        match self {
            MessageBody::Empty => MessageBody::Empty,
            MessageBody::Text(_) => MessageBody::Text(None),
            MessageBody::Bytes(_) => MessageBody::Bytes(BytesBody::new()),
            MessageBody::Map(_) => MessageBody::Map(MapBody::new()),
            MessageBody::Object(_) => MessageBody::Object(None),
            MessageBody::Stream(_) => MessageBody::Stream(StreamBody::new()),
        }
    }

    /// False for a body that was never given content, such as a cleared text body.
    pub fn has_content(&self) -> bool {
        match self {
            MessageBody::Empty => false,
            MessageBody::Text(text) => text.is_some(),
            MessageBody::Bytes(b) => !b.is_empty(),
            MessageBody::Map(m) => !m.is_empty(),
            MessageBody::Object(value) => value.is_some(),
            MessageBody::Stream(s) => !s.is_empty(),
        }
    }

    pub(crate) fn make_read_only(&mut self) {
        match self {
            MessageBody::Bytes(b) => b.reset(),
            MessageBody::Stream(s) => s.reset(),
            MessageBody::Map(m) => m.read_only = true,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
enum BytesMode {
    Write(BytesMut),
    Read { data: Bytes, cursor: Bytes },
}

/// Stream of uninterpreted bytes, encoded big-endian.
#[derive(Debug, Clone)]
pub struct BytesBody {
    mode: BytesMode,
}

impl Default for BytesBody {
    fn default() -> Self {
        Self::new()
    }
}

impl BytesBody {
    pub fn new() -> Self {
        Self {
            mode: BytesMode::Write(BytesMut::new()),
        }
    }

    /// A read-only body over existing content, as delivered by a provider.
    pub fn from_bytes(data: Bytes) -> Self {
        Self {
            mode: BytesMode::Read {
                cursor: data.clone(),
                data,
            },
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.mode, BytesMode::Read { .. })
    }

    /// Switch to read mode and rewind to the first byte.
    pub fn reset(&mut self) {
        let data = match &mut self.mode {
            BytesMode::Write(buf) => std::mem::take(buf).freeze(),
            BytesMode::Read { data, .. } => data.clone(),
        };
        self.mode = BytesMode::Read {
            cursor: data.clone(),
            data,
        };
    }

    /// Number of bytes in the body. Only available in read mode.
    pub fn body_length(&self) -> Result<u64, JmsError> {
        match &self.mode {
            BytesMode::Read { data, .. } => Ok(data.len() as u64),
            BytesMode::Write(_) => Err(JmsError::message_not_readable(
                "Bytes body is in write-only mode",
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.mode {
            BytesMode::Read { data, .. } => data.is_empty(),
            BytesMode::Write(buf) => buf.is_empty(),
        }
    }

    /// Full content regardless of the read position.
    pub fn content(&self) -> Bytes {
        match &self.mode {
            BytesMode::Read { data, .. } => data.clone(),
            BytesMode::Write(buf) => Bytes::copy_from_slice(buf),
        }
    }

    fn writer(&mut self) -> Result<&mut BytesMut, JmsError> {
        match &mut self.mode {
            BytesMode::Write(buf) => Ok(buf),
            BytesMode::Read { .. } => Err(JmsError::message_not_writeable(
                "Bytes body is in read-only mode",
            )),
        }
    }

    fn reader(&mut self, needed: usize) -> Result<&mut Bytes, JmsError> {
        match &mut self.mode {
            BytesMode::Read { cursor, .. } => {
                if cursor.remaining() < needed {
                    return Err(JmsError::message_eof(format!(
                        "Needed {} bytes but only {} remain",
                        needed,
                        cursor.remaining()
                    )));
                }
                Ok(cursor)
            }
            BytesMode::Write(_) => Err(JmsError::message_not_readable(
                "Bytes body is in write-only mode",
            )),
        }
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), JmsError> {
        self.writer()?.put_u8(u8::from(v));
        Ok(())
    }

    pub fn write_i8(&mut self, v: i8) -> Result<(), JmsError> {
        self.writer()?.put_i8(v);
        Ok(())
    }

    pub fn write_i16(&mut self, v: i16) -> Result<(), JmsError> {
        self.writer()?.put_i16(v);
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), JmsError> {
        self.writer()?.put_i32(v);
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), JmsError> {
        self.writer()?.put_i64(v);
        Ok(())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), JmsError> {
        self.writer()?.put_f32(v);
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), JmsError> {
        self.writer()?.put_f64(v);
        Ok(())
    }

    /// Length-prefixed UTF-8 string. The length prefix is a `u16`.
    pub fn write_utf(&mut self, v: &str) -> Result<(), JmsError> {
        let len = u16::try_from(v.len()).map_err(|_e| {
            JmsError::message_format(format!("String of {} bytes is too long", v.len()))
        })?;
        let buf = self.writer()?;
        buf.put_u16(len);
        buf.put_slice(v.as_bytes());
        Ok(())
    }

    /// Two bytes, high byte first. Only characters of the basic multilingual plane fit.
    pub fn write_char(&mut self, v: char) -> Result<(), JmsError> {
        let unit = u16::try_from(u32::from(v)).map_err(|_e| {
            JmsError::message_format(format!("Character `{}` does not fit in two bytes", v))
        })?;
        self.writer()?.put_u16(unit);
        Ok(())
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> Result<(), JmsError> {
        self.writer()?.put_slice(v);
        Ok(())
    }

    /// Write a typed value with the encoding of its type.
    pub fn write_object(&mut self, value: &PropertyValue) -> Result<(), JmsError> {
        match value {
            PropertyValue::Bool(v) => self.write_bool(*v),
            PropertyValue::Byte(v) => self.write_i8(*v),
            PropertyValue::Short(v) => self.write_i16(*v),
            PropertyValue::Char(v) => self.write_char(*v),
            PropertyValue::Int(v) => self.write_i32(*v),
            PropertyValue::Long(v) => self.write_i64(*v),
            PropertyValue::Float(v) => self.write_f32(*v),
            PropertyValue::Double(v) => self.write_f64(*v),
            PropertyValue::String(v) => self.write_utf(v),
            PropertyValue::Bytes(v) => self.write_bytes(v),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, JmsError> {
        Ok(self.reader(1)?.get_u8() != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8, JmsError> {
        Ok(self.reader(1)?.get_i8())
    }

    pub fn read_u8(&mut self) -> Result<u8, JmsError> {
        Ok(self.reader(1)?.get_u8())
    }

    pub fn read_i16(&mut self) -> Result<i16, JmsError> {
        Ok(self.reader(2)?.get_i16())
    }

    pub fn read_u16(&mut self) -> Result<u16, JmsError> {
        Ok(self.reader(2)?.get_u16())
    }

    /// A surrogate code unit is a format error and leaves the position unchanged.
    pub fn read_char(&mut self) -> Result<char, JmsError> {
        let cursor = self.reader(2)?;
        let unit = (&cursor[..2]).get_u16();
        let v = char::from_u32(u32::from(unit)).ok_or_else(|| {
            JmsError::message_format(format!("`{:#06x}` is not a character", unit))
        })?;
        cursor.advance(2);
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32, JmsError> {
        Ok(self.reader(4)?.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, JmsError> {
        Ok(self.reader(8)?.get_i64())
    }

    pub fn read_f32(&mut self) -> Result<f32, JmsError> {
        Ok(self.reader(4)?.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, JmsError> {
        Ok(self.reader(8)?.get_f64())
    }

    pub fn read_utf(&mut self) -> Result<String, JmsError> {
        let len = {
            let cursor = self.reader(2)?;
            let len = (&cursor[..2]).get_u16() as usize;
            if cursor.remaining() < 2 + len {
                return Err(JmsError::message_eof("String length exceeds remaining body"));
            }
            cursor.advance(2);
            len
        };
        let raw = self.reader(len)?.copy_to_bytes(len);
        String::from_utf8(raw.to_vec())
            .map_err(|e| JmsError::message_format("String is not valid UTF-8").with_linked(e))
    }

    /// Copy up to `buf.len()` bytes. `None` once the end of the body has been reached.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Option<usize>, JmsError> {
        let cursor = self.reader(0)?;
        if !cursor.has_remaining() {
            return Ok(None);
        }
        let n = buf.len().min(cursor.remaining());
        cursor.copy_to_slice(&mut buf[..n]);
        Ok(Some(n))
    }
}

#[derive(Debug, Clone)]
enum StreamMode {
    Write,
    Read(usize),
}

/// Ordered sequence of typed values, read back in the order written.
#[derive(Debug, Clone)]
pub struct StreamBody {
    values: Vec<PropertyValue>,
    mode: StreamMode,
}

impl Default for StreamBody {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBody {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            mode: StreamMode::Write,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.mode, StreamMode::Read(_))
    }

    pub fn reset(&mut self) {
        self.mode = StreamMode::Read(0);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn write(&mut self, value: impl Into<PropertyValue>) -> Result<(), JmsError> {
        match self.mode {
            StreamMode::Write => {
                self.values.push(value.into());
                Ok(())
            }
            StreamMode::Read(_) => Err(JmsError::message_not_writeable(
                "Stream body is in read-only mode",
            )),
        }
    }

    /// The position only advances when the conversion succeeds, so a failed read may be retried
    /// as another type.
    fn read_as<T>(
        &mut self,
        convert: impl FnOnce(&PropertyValue) -> Result<T, JmsError>,
    ) -> Result<T, JmsError> {
        let pos = match self.mode {
            StreamMode::Read(pos) => pos,
            StreamMode::Write => {
                return Err(JmsError::message_not_readable(
                    "Stream body is in write-only mode",
                ))
            }
        };
        let value = self
            .values
            .get(pos)
            .ok_or_else(|| JmsError::message_eof("End of stream body reached"))?;
        let converted = convert(value)?;
        self.mode = StreamMode::Read(pos + 1);
        Ok(converted)
    }

    pub fn read(&mut self) -> Result<PropertyValue, JmsError> {
        self.read_as(|v| Ok(v.clone()))
    }

    pub fn read_bool(&mut self) -> Result<bool, JmsError> {
        self.read_as(PropertyValue::to_bool)
    }

    pub fn read_i8(&mut self) -> Result<i8, JmsError> {
        self.read_as(PropertyValue::to_byte)
    }

    pub fn read_i16(&mut self) -> Result<i16, JmsError> {
        self.read_as(PropertyValue::to_short)
    }

    pub fn read_char(&mut self) -> Result<char, JmsError> {
        self.read_as(PropertyValue::to_char)
    }

    pub fn read_i32(&mut self) -> Result<i32, JmsError> {
        self.read_as(PropertyValue::to_int)
    }

    pub fn read_i64(&mut self) -> Result<i64, JmsError> {
        self.read_as(PropertyValue::to_long)
    }

    pub fn read_f32(&mut self) -> Result<f32, JmsError> {
        self.read_as(PropertyValue::to_float)
    }

    pub fn read_f64(&mut self) -> Result<f64, JmsError> {
        self.read_as(PropertyValue::to_double)
    }

    pub fn read_string(&mut self) -> Result<String, JmsError> {
        self.read_as(PropertyValue::to_text)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, JmsError> {
        self.read_as(PropertyValue::to_bytes)
    }
}

/// Named typed entries. Entry order is undefined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapBody {
    entries: HashMap<String, PropertyValue>,
    read_only: bool,
}

impl MapBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<(), JmsError> {
        if self.read_only {
            return Err(JmsError::message_not_writeable(format!(
                "Map body is read-only, cannot set `{}`",
                name
            )));
        }
        if name.is_empty() {
            return Err(JmsError::generic("Map entry name must not be empty"));
        }
        self.entries.insert(name.to_owned(), value.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name)
    }

    pub fn item_exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn typed<T>(
        &self,
        name: &str,
        convert: impl FnOnce(&PropertyValue) -> Result<T, JmsError>,
    ) -> Result<Option<T>, JmsError> {
        self.entries.get(name).map(convert).transpose()
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, JmsError> {
        self.typed(name, PropertyValue::to_bool)
    }

    pub fn get_byte(&self, name: &str) -> Result<Option<i8>, JmsError> {
        self.typed(name, PropertyValue::to_byte)
    }

    pub fn get_short(&self, name: &str) -> Result<Option<i16>, JmsError> {
        self.typed(name, PropertyValue::to_short)
    }

    pub fn get_char(&self, name: &str) -> Result<Option<char>, JmsError> {
        self.typed(name, PropertyValue::to_char)
    }

    pub fn get_int(&self, name: &str) -> Result<Option<i32>, JmsError> {
        self.typed(name, PropertyValue::to_int)
    }

    pub fn get_long(&self, name: &str) -> Result<Option<i64>, JmsError> {
        self.typed(name, PropertyValue::to_long)
    }

    pub fn get_float(&self, name: &str) -> Result<Option<f32>, JmsError> {
        self.typed(name, PropertyValue::to_float)
    }

    pub fn get_double(&self, name: &str) -> Result<Option<f64>, JmsError> {
        self.typed(name, PropertyValue::to_double)
    }

    pub fn get_string(&self, name: &str) -> Result<Option<String>, JmsError> {
        self.typed(name, PropertyValue::to_text)
    }

    pub fn get_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, JmsError> {
        self.typed(name, PropertyValue::to_bytes)
    }

    /// Owned copy of the entry in its stored type.
    pub fn get_object(&self, name: &str) -> Option<PropertyValue> {
        self.entries.get(name).cloned()
    }
}

/// A type a whole message body can be extracted as, see [`Message::get_body`].
///
/// [`Message::get_body`]: crate::message::Message::get_body
pub trait BodyType: Sized {
    /// Used in format errors.
    const NAME: &'static str;

    /// `None` when a body of this variant cannot be assigned to `Self`.
    fn extract(body: &MessageBody) -> Option<Result<Self, JmsError>>;
}

impl BodyType for String {
    const NAME: &'static str = "text";

    fn extract(body: &MessageBody) -> Option<Result<Self, JmsError>> {
        match body {
            MessageBody::Text(text) => Some(Ok(text.clone().unwrap_or_default())),
            _ => None,
        }
    }
}

/// The full content of a bytes body, independent of its read position.
impl BodyType for Bytes {
    const NAME: &'static str = "bytes";

    fn extract(body: &MessageBody) -> Option<Result<Self, JmsError>> {
        match body {
            MessageBody::Bytes(b) => Some(Ok(b.content())),
            _ => None,
        }
    }
}

impl BodyType for Vec<u8> {
    const NAME: &'static str = "bytes";

    fn extract(body: &MessageBody) -> Option<Result<Self, JmsError>> {
        Bytes::extract(body).map(|content| content.map(|b| b.to_vec()))
    }
}

impl BodyType for HashMap<String, PropertyValue> {
    const NAME: &'static str = "map";

    fn extract(body: &MessageBody) -> Option<Result<Self, JmsError>> {
        match body {
            MessageBody::Map(m) => Some(Ok(m.entries.clone())),
            _ => None,
        }
    }
}

impl BodyType for serde_json::Value {
    const NAME: &'static str = "object";

    fn extract(body: &MessageBody) -> Option<Result<Self, JmsError>> {
        match body {
            MessageBody::Object(value) => Some(Ok(value.clone().unwrap_or_default())),
            _ => None,
        }
    }
}
