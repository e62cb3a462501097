//! HTTP request handlers organized by resource

pub mod health;
pub mod queue;
pub mod schedules;
