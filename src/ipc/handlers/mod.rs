pub mod accounts;
pub mod admin;
pub mod attendance;
pub mod checkin;
pub mod core;
pub mod notifications;
pub mod schedule;
pub mod setup;
