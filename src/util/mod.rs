//! Small encoding helpers

pub mod varint;
