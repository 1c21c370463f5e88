//! Send messages to a broker.

pub mod request;
pub mod response;
