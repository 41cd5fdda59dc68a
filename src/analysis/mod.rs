pub mod carrier;
pub mod extractor;
pub mod insights;
pub mod summary;
