//! API request handlers

pub mod codetainers;
pub mod files;
pub mod health;
pub mod images;
pub mod session;
pub mod tty;
