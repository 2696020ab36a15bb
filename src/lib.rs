//! Postguard - Sliding-Window Rate Limiting for Discussion Boards
//!
//! This crate protects the posting, login, password reset and general API
//! endpoints of a membership discussion board with in-memory sliding-window
//! rate limits. Each limiter keeps a bounded LRU + TTL cache of recent
//! request timestamps per caller key; it is process-local and not shared
//! across instances.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
