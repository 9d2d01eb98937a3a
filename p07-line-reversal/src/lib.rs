//! Line Reversal Control Protocol (LRCP): a reliable, in-order byte
//! stream layered on top of unreliable UDP datagrams.
//!
//! Clients open a session with `connect`, stream bytes with `data`
//! framed by a byte offset, ack with `ack`, and tear down with
//! `close`. This crate's server application reverses each line it
//! receives and streams the reversed lines back.

pub mod lrcp;

pub use lrcp::protocol::{run, DefaultSocketHandler};
