//! HTTP route modules

pub mod auth;
pub mod cards;
pub mod health;
pub mod lessons;
pub mod sync;
