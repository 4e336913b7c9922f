//! # codekt
//!
//! Structural analysis and knowledge-transfer material for Python codebases.
//!
//! A project directory is scanned, each Python file is parsed and reduced
//! to its classes, top-level functions, and imports, and those facts feed a
//! documentation generator, a multi-day onboarding plan, and a per-project
//! search index used to answer questions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ Scanner  │──▶│ Extractor│──▶│ Docs + Plan  │──▶│  SQLite  │
//! │ walkdir  │   │tree-sitter│  │ (LLM/offline)│   │ FTS5+Vec │
//! └──────────┘   └──────────┘   └──────────────┘   └────┬─────┘
//!                                                       │
//!                                   ┌───────────────────┤
//!                                   ▼                   ▼
//!                              ┌──────────┐       ┌──────────┐
//!                              │   CLI    │       │   HTTP   │
//!                              │   (kt)   │       │  (axum)  │
//!                              └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`syntax`] | Python parse tree lowered to a small tagged AST |
//! | [`extract`] | Structural extractor and parallel batch driver |
//! | [`scanner`] | Project file discovery |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Project, file, docs, plan, and progress persistence |
//! | [`llm`] | Anthropic / OpenAI completion clients |
//! | [`docgen`] | Documentation generator |
//! | [`plan`] | KT plan generator |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`index`] | Per-project keyword / semantic search |
//! | [`chat`] | Question answering |
//! | [`pipeline`] | End-to-end analysis run |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod config;
pub mod db;
pub mod docgen;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod plan;
pub mod scanner;
pub mod server;
pub mod store;
pub mod syntax;
