pub mod agent;
pub mod cmd;
pub mod complexity;
pub mod config;
pub mod dag;
pub mod errors;
pub mod fabric;
pub mod gates;
pub mod healing;
pub mod intervention;
pub mod phase_spec;
pub mod publisher;
pub mod resolver;
pub mod telemetry;
pub mod tracker;
pub mod tycho;
pub mod worker_group;
