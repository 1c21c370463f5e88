//! Deserialize data from the bytecode protocol.
//!
//! Primitives are nom streaming parsers over [`NomBytes`], so running
//! off the end of a buffer surfaces as `Incomplete` and is reported as
//! [`Error::TruncatedInput`], distinct from structurally invalid data
//! which is reported as [`Error::MalformedInput`].
use bytes::Bytes;
use nom::{
    bytes::streaming::take,
    combinator::map,
    error::{Error as NomError, ErrorKind, ParseError},
    number::streaming::{be_i16, be_i32, be_i64, be_i8},
    IResult, InputLength,
};
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::error::{Error, KafkaCode, Result};

pub fn parse_kafka_code(s: NomBytes) -> IResult<NomBytes, KafkaCode> {
    map(be_i16, |n| {
        FromPrimitive::from_i16(n).unwrap_or(KafkaCode::Unknown)
    })(s)
}

pub fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i16(s)?;
    if length < 0 {
        return Err(nom::Err::Error(NomError::new(s, ErrorKind::LengthValue)));
    }
    let (s, string) = take(length as u16)(s)?;
    Ok((s, string.into_bytes()))
}

pub fn parse_nullable_string(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i16(s)?;
    if length == -1 {
        return Ok((s, None));
    }
    if length < -1 {
        return Err(nom::Err::Error(NomError::new(s, ErrorKind::LengthValue)));
    }

    let (s, string) = take(length as u16)(s)?;
    Ok((s, Some(string.into_bytes())))
}

pub fn parse_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i32(s)?;
    if length < 0 {
        return Err(nom::Err::Error(NomError::new(s, ErrorKind::LengthValue)));
    }
    let (s, bytes) = take(length as u32)(s)?;
    Ok((s, bytes.into_bytes()))
}

pub fn parse_nullable_bytes(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i32(s)?;
    if length == -1 {
        return Ok((s, None));
    }
    if length < -1 {
        return Err(nom::Err::Error(NomError::new(s, ErrorKind::LengthValue)));
    }

    let (s, bytes) = take(length as u32)(s)?;
    Ok((s, Some(bytes.into_bytes())))
}

/// Count-prefixed repetition of `f`. A count of −1 parses as an empty
/// collection; the response schemas this crate speaks never carry null
/// arrays, nullability is handled by [`Reader::read_array`].
pub fn parse_array<O, E, F>(mut f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, Vec<O>, E>
where
    F: nom::Parser<NomBytes, O, E>,
    E: ParseError<NomBytes>,
{
    move |input: NomBytes| {
        let (mut i, count) = be_i32(input)?;
        if count == -1 {
            return Ok((i, vec![]));
        }
        if count < -1 {
            return Err(nom::Err::Error(E::from_error_kind(
                i,
                ErrorKind::LengthValue,
            )));
        }
        let mut items = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let (rest, item) = f.parse(i)?;
            i = rest;
            items.push(item);
        }
        Ok((i, items))
    }
}

/// Run a parser over a whole response body, mapping nom failures into
/// the crate error taxonomy.
pub(crate) fn run_parser<T, F>(input: Bytes, parser: F) -> Result<T>
where
    F: FnOnce(NomBytes) -> IResult<NomBytes, T>,
{
    match parser(NomBytes::new(input.clone())) {
        Ok((_, value)) => Ok(value),
        Err(nom::Err::Incomplete(_)) => Err(Error::TruncatedInput),
        Err(_) => Err(Error::MalformedInput(input)),
    }
}

/// Positional, non-destructive view over a response buffer.
///
/// Reads advance an internal position; the underlying buffer is shared,
/// so `read_bytes` hands out zero-copy slices of it.
#[derive(Clone, Debug)]
pub struct Reader {
    input: NomBytes,
    len: usize,
}

impl Reader {
    pub fn new(input: Bytes) -> Reader {
        Reader {
            len: input.len(),
            input: NomBytes::new(input),
        }
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.len - self.input.input_len()
    }

    /// True once the buffer has been exactly consumed.
    pub fn eof(&self) -> bool {
        self.input.input_len() == 0
    }

    fn run<O, F>(&mut self, parser: F) -> Result<O>
    where
        F: FnOnce(NomBytes) -> IResult<NomBytes, O>,
    {
        match parser(self.input.clone()) {
            Ok((rest, value)) => {
                self.input = rest;
                Ok(value)
            }
            Err(nom::Err::Incomplete(_)) => Err(Error::TruncatedInput),
            Err(_) => Err(Error::MalformedInput(self.input.to_bytes())),
        }
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.run(be_i8)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.run(be_i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.run(be_i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.run(be_i64)
    }

    /// Length-prefixed UTF-8 string; length −1 reads as `None`.
    pub fn read_string(&mut self) -> Result<Option<String>> {
        match self.run(parse_nullable_string)? {
            None => Ok(None),
            Some(raw) => match std::str::from_utf8(&raw) {
                Ok(s) => Ok(Some(s.to_owned())),
                Err(_) => Err(Error::MalformedInput(raw.clone())),
            },
        }
    }

    /// Length-prefixed bytes; length −1 reads as `None`.
    pub fn read_bytes(&mut self) -> Result<Option<Bytes>> {
        self.run(parse_nullable_bytes)
    }

    /// Count-prefixed array of `elem`; count −1 reads as `None`.
    pub fn read_array<O, F>(&mut self, mut elem: F) -> Result<Option<Vec<O>>>
    where
        F: FnMut(NomBytes) -> IResult<NomBytes, O>,
    {
        let count = self.run(be_i32)?;
        if count == -1 {
            return Ok(None);
        }
        if count < -1 {
            return Err(Error::MalformedInput(self.input.to_bytes()));
        }
        let mut items = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            items.push(self.run(&mut elem)?);
        }
        Ok(Some(items))
    }
}
