//! Beacon - Marketing site backend
//!
//! Blog, social cross-posting, newsletter, FAQ and page content, automation
//! rules and a publishing scheduler behind one JSON API, plus the public
//! HTML pages.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod integrations;
pub mod models;
pub mod services;
pub mod theme;
