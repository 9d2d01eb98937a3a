//! LRCP (Line Reversal Control Protocol): a reliable byte stream over
//! UDP, built from four message types — `connect`, `data`, `ack`,
//! `close` — each a `/`-delimited ASCII line.

pub mod packets;
pub mod protocol;
mod session;
