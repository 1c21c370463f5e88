//! Serialize data into the bytecode protocol.
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// Helper macro to safely convert an usize expression into a signed
// integer. If the conversion is not possible the macro issues an
// `EncodingError`, otherwise returns the expression in the requested
// target type.
macro_rules! try_usize_to_int {
    ($value:expr, $ttype:ident) => {{
        let maxv = $ttype::MAX;
        let x: usize = $value;
        if (x as u64) <= (maxv as u64) {
            x as $ttype
        } else {
            return Err(Error::EncodingError);
        }
    }};
}

/// Big-endian wire encoding for one protocol value.
///
/// Every request schema is expressed as a sequence of these encodes.
pub trait ToByte {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()>;
}

impl<'a, T: ToByte + 'a + ?Sized> ToByte for &'a T {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        (*self).encode(buffer)
    }
}

impl ToByte for i8 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i8(*self);
        Ok(())
    }
}

impl ToByte for i16 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i16(*self);
        Ok(())
    }
}

impl ToByte for i32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i32(*self);
        Ok(())
    }
}

impl ToByte for i64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i64(*self);
        Ok(())
    }
}

// the CRC field of a message is the one unsigned quantity on the wire
impl ToByte for u32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u32(*self);
        Ok(())
    }
}

impl ToByte for str {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        let l = try_usize_to_int!(self.len(), i16);
        buffer.put_i16(l);
        buffer.put(self.as_bytes());
        Ok(())
    }
}

impl ToByte for String {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.as_str().encode(buffer)
    }
}

impl<V: ToByte> ToByte for [V] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        encode_as_array(buffer, self, |buffer, x| x.encode(buffer))
    }
}

impl ToByte for [u8] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        let l = try_usize_to_int!(self.len(), i32);
        buffer.put_i32(l);
        buffer.put(self);
        Ok(())
    }
}

impl<'a> ToByte for Option<&'a [u8]> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match *self {
            Some(xs) => xs.encode(buffer),
            None => (-1i32).encode(buffer),
        }
    }
}

impl ToByte for Option<Bytes> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match self {
            Some(xs) => xs.encode(buffer),
            None => (-1i32).encode(buffer),
        }
    }
}

impl<'a> ToByte for Option<&'a str> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match *self {
            Some(xs) => xs.encode(buffer),
            None => (-1i16).encode(buffer),
        }
    }
}

// ~ this allows to render a slice of various types (typically &str
// and String) as strings
pub struct AsStrings<'a, T>(pub &'a [T]);

impl<'a, T: AsRef<str> + 'a> ToByte for AsStrings<'a, T> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        encode_as_array(buffer, self.0, |buffer, x| x.as_ref().encode(buffer))
    }
}

/// ~ Renders the length of `xs` to `buffer` as the start of a
/// protocol array and then for each element of `xs` invokes `f`
/// assuming that function will render the element to the buffer.
pub fn encode_as_array<T, F, W>(buffer: &mut W, xs: &[T], mut f: F) -> Result<()>
where
    F: FnMut(&mut W, &T) -> Result<()>,
    W: BufMut,
{
    let l = try_usize_to_int!(xs.len(), i32);
    buffer.put_i32(l);
    for x in xs {
        f(buffer, x)?;
    }
    Ok(())
}

/// Append-only buffer for building request payloads.
///
/// Appends happen through the [`ToByte`] primitives; [`take_bytes`]
/// consumes the builder, so nothing can be appended after the payload
/// has been handed off.
///
/// [`take_bytes`]: Builder::take_bytes
#[derive(Debug, Default)]
pub struct Builder {
    buf: BytesMut,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Builder {
        Builder {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes appended so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn add_i8(&mut self, v: i8) -> Result<&mut Self> {
        v.encode(&mut self.buf)?;
        Ok(self)
    }

    pub fn add_i16(&mut self, v: i16) -> Result<&mut Self> {
        v.encode(&mut self.buf)?;
        Ok(self)
    }

    pub fn add_i32(&mut self, v: i32) -> Result<&mut Self> {
        v.encode(&mut self.buf)?;
        Ok(self)
    }

    pub fn add_i64(&mut self, v: i64) -> Result<&mut Self> {
        v.encode(&mut self.buf)?;
        Ok(self)
    }

    /// `None` is rendered as length −1.
    pub fn add_string(&mut self, v: Option<&str>) -> Result<&mut Self> {
        v.encode(&mut self.buf)?;
        Ok(self)
    }

    /// `None` is rendered as length −1.
    pub fn add_bytes(&mut self, v: Option<&[u8]>) -> Result<&mut Self> {
        v.encode(&mut self.buf)?;
        Ok(self)
    }

    /// `None` is rendered as count −1.
    pub fn add_array<V: ToByte>(&mut self, items: Option<&[V]>) -> Result<&mut Self> {
        match items {
            Some(xs) => xs.encode(&mut self.buf)?,
            None => (-1i32).encode(&mut self.buf)?,
        }
        Ok(self)
    }

    /// Hand off the built payload, consuming the builder.
    pub fn take_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
