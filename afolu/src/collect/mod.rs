pub mod anthropic;
pub mod catalog;
pub mod earth_engine;
pub mod ee_graph;
pub mod global_variables;
pub mod memory;
pub mod retry;
