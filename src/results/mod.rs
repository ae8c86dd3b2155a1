//! Plain result values handed to callers: schemas, rows and buffers.

mod buffer;
mod row;
mod schema;

pub use buffer::{Buffer, BufferSet, PartialBufferSet};
pub use row::{Row, ScanTarget, Slot};
pub use schema::{Column, Schema};
