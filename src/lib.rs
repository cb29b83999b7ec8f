pub mod agent_modules;
pub mod artifacts;
pub mod assignment;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod provisioner;
pub mod scheduler;
pub mod version;
pub mod web;
