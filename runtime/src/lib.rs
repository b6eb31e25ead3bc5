// Copyright 2026 Portal Contributors
// SPDX-License-Identifier: Apache-2.0

//! Portal runtime library: CAPTCHA-gated login, browser-to-HTTP session
//! bridge and frame-aware report extraction for the score portal.
//!
//! This library crate exposes the core modules for integration testing.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod extraction;
pub mod orchestrator;
pub mod portal;
pub mod protocol;
pub mod renderer;
pub mod rest;
