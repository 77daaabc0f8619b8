//! Request handlers

pub mod booking;
pub mod health;
pub mod keys;
pub mod webhooks;
