pub mod agent;
pub mod blocking;
pub mod client;
pub mod config;
pub mod database;
pub mod messaging;
pub mod models;
pub mod poller;
pub mod rules;
pub mod startup;
pub mod test_utils;
pub mod tokens;
pub mod utils;
pub mod web;

pub use utils::state;
