pub mod buffer;
pub mod error;
pub mod slicer;
pub mod slicing;
pub mod stitching;
pub mod worker;
