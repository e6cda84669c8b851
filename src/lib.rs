//! # Memory Harness
//!
//! A local-first personal knowledge store.
//!
//! Memories are markdown files with YAML frontmatter, versioned in a git
//! repository that can mirror a remote, and retrievable through hybrid
//! (semantic + lexical) search. The file tree is authoritative; the
//! semantic index and the remote replica are derived views kept consistent
//! by the store, the reconciler, and the sync manager.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!   CLI ──────▶│ EntityStore  │──────────────┐
//!              └──┬────────┬──┘              │ commit
//!        search   │        │ write           ▼
//!   ┌─────────────▼─┐   ┌──▼─────────┐  ┌─────────────┐   ┌────────┐
//!   │  retrieval    │   │ entities/  │  │ SyncManager │──▶│ remote │
//!   │ scorer + index│   │  *.md      │  │  (git)      │◀──│  git   │
//!   └───────▲───────┘   └──┬─────────┘  └─────────────┘   └────────┘
//!           │              │ notify
//!   ┌───────┴──────┐   ┌───▼──────────────┐
//!   │SemanticIndex │◀──│ IndexReconciler  │
//!   └──────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mem init
//! mem add --title "Trip to Japan" --type travel/japan --tag trip --content "Kyoto in May"
//! mem search "kyoto"
//! mem sync
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`frontmatter`] | Persisted entity codec |
//! | [`store`] | Authoritative CRUD over the file tree |
//! | [`scorer`] | Lexical relevance heuristic |
//! | [`retrieval`] | Hybrid fusion of semantic and lexical results |
//! | [`index`] | Semantic index capability and backends |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`reconciler`] | File watcher feeding the index |
//! | [`git`] | Async git subprocess wrapper |
//! | [`sync`] | Local history, remote mirroring, conflict resolution |
//! | [`app`] | Component wiring |
//! | [`commands`] | CLI command implementations |

pub mod app;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod frontmatter;
pub mod git;
pub mod index;
pub mod models;
pub mod reconciler;
pub mod retrieval;
pub mod scorer;
pub mod store;
pub mod sync;
