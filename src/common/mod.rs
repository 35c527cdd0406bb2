// Common utilities shared across volume, stream and map readers

pub mod binary;
pub mod names;

// Shared constants
pub const MIB: u64 = 1024 * 1024;
