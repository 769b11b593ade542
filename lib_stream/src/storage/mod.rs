//! # Storage
//!
//! Durable sinks for the stream. Currently one: the per-tag rotating JSON Lines
//! writer.

pub mod rotating_writer;

pub use rotating_writer::{
    file_path, RotatingFileWriter, WriteReceipt, WriterError, DEFAULT_MAX_FILE_SIZE,
    MIN_MAX_FILE_SIZE,
};
