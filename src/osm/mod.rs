pub mod conversion;
pub mod download;
