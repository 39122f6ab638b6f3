//! # parktree
//!
//! Concurrent K-tree clustering of short DNA sequences.
//!
//! Each sequence is packed into a 64-bit [`Signature`] (2 bits per base, up
//! to 32 bases). Signatures are inserted into a height-balanced K-tree whose
//! nodes are split by medoid bisection when they overflow. Once every
//! signature is in, each one is routed down the finished tree and the leaf it
//! reaches is its cluster.
//!
//! Nodes live in a fixed, preallocated [`NodeArena`] of atomic attributes
//! with one lock per node, so any number of worker threads can insert at
//! once.
//!
//! ## Example
//!
//! ```rust
//! use parktree::{cluster, Config, Signature};
//!
//! let sigs: Vec<Signature> = ["AAAA", "AAAA", "TTTT", "TTTT"]
//!     .iter()
//!     .map(|s| Signature::encode(s.as_bytes()))
//!     .collect();
//!
//! let config = Config::default().with_order(2).with_capacity(64).with_threads(1);
//! let result = cluster(&sigs, &config).unwrap();
//!
//! assert_eq!(result.cluster_count, 2);
//! assert_eq!(result.assignments, vec![0, 0, 1, 1]);
//! ```

pub mod arena;
pub mod bisect;
pub mod cluster;
pub mod config;
pub mod error;
pub mod matrix;
pub mod signature;
pub mod tree;

pub use arena::{FreeList, NodeArena, NodeId, NodeKind};
pub use cluster::{cluster, compress_cluster_ids, Clustering};
pub use config::Config;
pub use error::{Error, Result};
pub use signature::{distance, Signature};
pub use tree::{KTree, TreeStats};

#[cfg(test)]
mod proptests;
