//! Image acquisition: reference resolution, transfer, unpack.

pub mod copy;
pub mod pipeline;
pub mod reference;
pub mod retry;
pub mod unpack;
