pub mod backend;
pub mod filter;
pub mod interfaces;
pub mod orchestrator;
