//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.

pub mod group;
pub mod ledger;
pub mod recommend;
pub mod room;
pub mod scoring;
pub mod session;
pub mod voting;
