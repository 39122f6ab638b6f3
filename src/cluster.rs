//! The clustering driver: build a tree from a batch of signatures and read
//! a flat clustering back out of its leaves.

use std::collections::HashMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::arena::{FreeList, ROOT_SLOT};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::signature::Signature;
use crate::tree::KTree;

/// Dense cluster assignment for a batch of signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clustering {
    /// `assignments[i]` is the cluster of input `i`, in `0..cluster_count`.
    pub assignments: Vec<usize>,
    pub cluster_count: usize,
}

impl Clustering {
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Number of inputs in each cluster.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.cluster_count];
        for &id in &self.assignments {
            sizes[id] += 1;
        }
        sizes
    }
}

/// Cluster `signatures` with a K-tree built to `config`.
///
/// The first signature is inserted alone to create the root; the rest are
/// split into one contiguous chunk per worker and inserted concurrently.
/// Every signature is then routed down the finished tree and the leaf it
/// lands in becomes its cluster.
///
/// With more than one worker the tree shape, and so the clustering, depends
/// on thread scheduling.
pub fn cluster(signatures: &[Signature], config: &Config) -> Result<Clustering> {
    config.validate()?;
    let Some((&first, rest)) = signatures.split_first() else {
        debug!("no signatures to cluster");
        return Ok(Clustering::default());
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| Error::InvalidConfig(format!("cannot build thread pool: {e}")))?;
    let workers = pool.current_num_threads();

    let tree = KTree::new(config.order, config.capacity);
    info!(
        signatures = signatures.len(),
        workers,
        order = config.order,
        capacity = config.capacity,
        arena_bytes = tree.arena().memory_usage(),
        "building tree"
    );

    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);
    tree.insert(first, &mut FreeList::new(vec![ROOT_SLOT], config.capacity), &mut rng)?;

    if !rest.is_empty() {
        let chunk = rest.len().div_ceil(workers);
        let free_lists = tree.arena().free_lists(workers);
        pool.install(|| {
            free_lists
                .into_par_iter()
                .zip(rest.par_chunks(chunk))
                .enumerate()
                .try_for_each(|(t, (mut free, batch))| {
                    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                    for &sig in batch {
                        tree.insert(sig, &mut free, &mut rng)?;
                    }
                    debug!(worker = t, inserted = batch.len(), spare = free.len(), "worker done");
                    Ok::<_, Error>(())
                })
        })?;
    }

    let stats = tree.stats();
    info!(
        leaves = stats.leaves,
        branches = stats.branches,
        depth = stats.depth,
        elapsed = ?start.elapsed(),
        "tree built"
    );

    let mut assignments: Vec<usize> = pool.install(|| {
        signatures
            .par_iter()
            .map(|&sig| tree.traverse(sig).index())
            .collect()
    });
    let cluster_count = compress_cluster_ids(&mut assignments);
    info!(clusters = cluster_count, "assigned clusters");

    Ok(Clustering {
        assignments,
        cluster_count,
    })
}

/// Renumber arbitrary ids to `0..k` in order of first appearance and
/// return `k`.
pub fn compress_cluster_ids(ids: &mut [usize]) -> usize {
    let mut dense: HashMap<usize, usize> = HashMap::new();
    for id in ids.iter_mut() {
        let next = dense.len();
        *id = *dense.entry(*id).or_insert(next);
    }
    dense.len()
}
