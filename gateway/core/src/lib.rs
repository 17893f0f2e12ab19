// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # aegis-datagate-core
//!
//! The request-processing plane of the AEGIS data-access gateway. This crate
//! owns the domain model, the orchestration workflow, the security stack, the
//! master-data-hub adapter, and the HTTP/JSON-RPC presentation surface.
//!
//! ## Bounded Contexts Implemented
//!
//! | Bounded Context | Key modules |
//! |---|---|
//! | **Identity & Tokens** | [`domain::principal`], [`infrastructure::oauth`], [`infrastructure::revocation`] |
//! | **Security Gateway** | [`infrastructure::rate_limit`], [`infrastructure::threat`], [`infrastructure::semantic`], [`infrastructure::advisory`] |
//! | **Orchestration** | [`domain::state`], [`application::workflow`], [`application::nodes`] |
//! | **Agent Pipeline** | [`application::pipeline`], [`application::agents`] |
//! | **Master Data Hub** | [`domain::model`], [`infrastructure::datahub`] |
//! | **Audit** | [`domain::audit`], [`infrastructure::audit`] |
//!
//! ## Layer Structure
//!
//! ```text
//! presentation/   ← HTTP API (axum), JSON-RPC envelope
//!     ↓
//! application/    ← Workflow engine, pipeline stages, use-case services
//!     ↓
//! domain/         ← Aggregates, value objects, enums, error taxonomy
//!     ↓
//! infrastructure/ ← OAuth, rate limiting, threat detection, LLM + MDH adapters, audit sink
//! ```
//!
//! ## Integration Tests
//!
//! See `gateway/core/tests/` for integration suites covering the security
//! gateway, the orchestration workflow, and the MCP endpoint surface.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
