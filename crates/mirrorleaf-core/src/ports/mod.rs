//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - The remote file store (listing, mutations, content, revisions)
//! - [`ICipher`] - Opaque encryption primitives
//! - [`IContentStore`] - Local cache of file content
//! - [`ISyncMetaStore`] - Last authoritative remote snapshot
//! - [`IHistoryStore`] - Local and remote edit history

pub mod cipher;
pub mod local_store;
pub mod remote_store;

pub use cipher::{CipherError, ICipher};
pub use local_store::{IContentStore, IHistoryStore, ISyncMetaStore};
pub use remote_store::{
    IRemoteStore, ListTreeResponse, Mutation, MutationResponse, RemoteContent, RemoteFile,
    RemoteRevision,
};
