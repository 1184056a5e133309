pub mod config;
pub mod db;
pub mod services;
pub mod utils;
