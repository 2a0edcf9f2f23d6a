pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod gate;
pub mod hitl;
pub mod init;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod notify;
pub mod store;
