//! Describes the currently available brokers, their host and port
//! information, and which broker leads which partition.
//!
//! This API answers the following questions:
//! - What topics exist, and how many partitions does each have?
//! - Which broker is currently the leader for each partition?
//! - What is the host and port for each of these brokers?
//!
//! This is the only request that can be addressed to any broker in
//! the cluster, which is what makes bootstrapping off a static server
//! list possible. An empty topic list asks for every topic.

pub mod request;
pub mod response;
