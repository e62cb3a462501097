pub mod config;
pub mod database;
pub mod entities;
pub mod errors;
pub mod job_scheduling;
pub mod observability;
pub mod providers;
pub mod web;
