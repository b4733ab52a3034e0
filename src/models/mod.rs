pub mod barcode;
pub mod job;
pub mod product;
pub mod scan;
