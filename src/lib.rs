//! Marathon: an autonomous orchestrator that walks each candidate through a
//! fixed sequence of hiring stages, keeping an evolving belief about them,
//! noticing when that belief reverses, and escalating to a human whenever
//! it is not confident enough to act alone.

pub mod anthropic;
pub mod audit;
pub mod belief_manager;
pub mod cli;
pub mod config;
pub mod corrections;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod reasoning;
pub mod stage_data;
pub mod state_machine;
pub mod store;
pub mod ui;
pub mod worker;
