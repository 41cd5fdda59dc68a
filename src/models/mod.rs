pub mod config;
pub mod diagnosis;
pub mod insight;
pub mod interface;
pub mod record;
pub mod request;
pub mod stats;
pub mod task;
