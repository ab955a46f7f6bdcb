//! Authentication core: identity resolution, OTP, OAuth, tokens and the
//! orchestrator that ties them together.

pub mod config;
pub mod error;
pub mod identity;
pub mod notify;
pub mod oauth;
pub mod otp;
pub mod password;
pub mod roles;
pub mod service;
pub mod storage;
pub mod tokens;
