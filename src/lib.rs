//! Petzy chat server library.
//! This crate exposes internal modules for integration testing and embeds
//! the client-side session used by the companion apps.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod client;
pub mod community;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod routes;
pub mod state;
pub mod users;
pub mod ws;
