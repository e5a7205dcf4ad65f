//! Mirrorleaf Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Identifier`, `TreeNode`, `CacheEntry`, `SyncSnapshot`, `FileHistory`
//! - **Tree derivation** - `build_tree` turns a flat path-encoded file list into folders
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `ICipher`,
//!   `IContentStore`, `ISyncMetaStore`, `IHistoryStore`
//! - **Configuration** - YAML configuration with validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement.

pub mod config;
pub mod domain;
pub mod ports;
