//! Agora - community forum backend
//!
//! Topics with polls and tags, moderation of topic submissions, banned
//! addresses and the image gallery, served as server-rendered pages.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod views;
