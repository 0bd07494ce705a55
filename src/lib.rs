pub mod alert;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod model;
pub mod monitor;
pub mod registry;
pub mod remote;
pub mod unit_file;
