//! # Bookshelf Retrieval
//!
//! Per-user document retrieval for a study assistant. Each user keeps a
//! bookshelf of PDFs and text documents; this crate finds the passages
//! relevant to a query so they can be quoted in a prompt.
//!
//! Retrieval prefers an external full-text index (OpenSearch). When the
//! index has nothing for the user, because the document was never indexed
//! or the index is down, it scans the user's documents in process, reading
//! large PDFs lazily: the first pages while the query waits, the rest on a
//! bounded pool of background workers.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────┐   hit   ┌──────────────┐
//!   retrieve ───▶ │  Retrieval │ ──────▶ │ IndexGateway │ (OpenSearch / memory)
//!                 │   Engine   │ ◀────── └──────▲───────┘
//!                 └─────┬──────┘   miss         │ upsert
//!                       │ scan            ┌─────┴─────┐
//!                       ▼                 │  Indexer  │◀── index / deindex / sync
//!   ┌─────────┐   ┌───────────┐           └─────┬─────┘
//!   │ Library │──▶│ Extraction│◀── workers      │
//!   │ (SQLite)│   │   Cache   │                 ▼
//!   └─────────┘   └───────────┘          Chunking policy
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shelf init
//! shelf add ./Precalculus.pdf --owner alice
//! shelf sync --owner alice
//! shelf search "precalculus chapter" --owner alice
//! shelf serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors of the retrieval core |
//! | [`extract`] | Page-windowed text extraction |
//! | [`chunk`] | Page chunking and scan windows |
//! | [`index`] | Full-text index gateway (OpenSearch, in-memory) |
//! | [`cache`] | Extracted text and extraction state per document |
//! | [`worker`] | Background extraction pool |
//! | [`fetch`] | Document byte fetching |
//! | [`library`] | Document record store |
//! | [`indexer`] | Index write path |
//! | [`retrieval`] | Hybrid retrieval engine |
//! | [`server`] | HTTP API |
//! | [`commands`] | `shelf` command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod indexer;
pub mod library;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod worker;
