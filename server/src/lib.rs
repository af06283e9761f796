#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Product catalog service: validation, persistence contract, API key
//! authentication and the HTTP surface binding them together.

pub mod auth;
pub mod config;
pub mod http;
pub mod storage;
pub mod validation;
