//! Bytecode protocol requests & responses.
//!
//! Each supported API is a pair of files: the request side holds a
//! typed struct that knows how to encode itself, the response side a
//! typed struct parsed out of the raw frame. Picking an API means
//! constructing that request type; there is no shared dynamic body.
//!
//! Every request starts with the same envelope: the API key and
//! version, the correlation id the broker will echo back, and the
//! client id. Every response starts with the echoed correlation id.

pub mod metadata;
pub mod produce;

use bytes::BufMut;
use nom::{number::streaming::be_i32, IResult};
use nombytes::NomBytes;

// re exporting these for ease
pub use self::{
    metadata::{request::MetadataRequest, response::MetadataResponse},
    produce::{request::ProduceRequest, response::ProduceResponse},
};
use crate::{encode::ToByte, error::Result};

#[derive(Debug, Clone)]
pub struct HeaderRequest<'a> {
    /// The API key of this request.
    pub api_key: i16,
    /// The API version of this request.
    pub api_version: i16,
    /// The correlation ID of this request.
    pub correlation_id: i32,
    /// The client ID string.
    pub client_id: &'a str,
}

impl<'a> HeaderRequest<'a> {
    /// Create new header request.
    ///
    /// This goes at the beginning of every single request.
    pub fn new(
        api_key: i16,
        api_version: i16,
        correlation_id: i32,
        client_id: &'a str,
    ) -> HeaderRequest {
        HeaderRequest {
            api_key,
            api_version,
            correlation_id,
            client_id,
        }
    }
}

impl<'a> ToByte for HeaderRequest<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.api_key.encode(buffer)?;
        self.api_version.encode(buffer)?;
        self.correlation_id.encode(buffer)?;
        self.client_id.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct HeaderResponse {
    /// The correlation ID of this response.
    pub correlation_id: i32,
}

pub fn parse_header_response(s: NomBytes) -> IResult<NomBytes, HeaderResponse> {
    let (s, correlation_id) = be_i32(s)?;
    Ok((s, HeaderResponse { correlation_id }))
}
