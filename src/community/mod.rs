//! Community (group chat) management: creation, listing, and membership.

pub mod crud;
pub mod members;
