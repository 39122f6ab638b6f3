use super::*;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

use crate::arena::ROOT_SLOT;

/// Structural invariants of a tree once every insert has returned.
fn validate_tree(t: &KTree, inserted: usize) {
    let arena = t.arena();
    let root = t.root();
    if inserted == 0 {
        assert!(root.is_none(), "empty tree must have no root");
        return;
    }
    assert!(!root.is_none(), "non-empty tree must have a root");
    assert!(arena.parent(root).is_none(), "root must not have a parent");

    let mut seen = HashSet::new();
    let mut stack = vec![(root, 1usize)];
    let mut leaf_entries = 0usize;
    let mut leaf_depth: Option<usize> = None;
    while let Some((node, depth)) = stack.pop() {
        assert!(seen.insert(node), "{node:?} reachable twice");

        let count = arena.child_count(node);
        assert!(count <= t.order(), "{node:?} holds {count} > order");

        if !arena.is_branch(node) {
            leaf_entries += count;
            match leaf_depth {
                None => leaf_depth = Some(depth),
                Some(d) => assert_eq!(d, depth, "leaves must all sit at one depth"),
            }
            continue;
        }

        assert!(count > 0, "branch {node:?} has no children");
        for slot in 0..count {
            let child = arena.child(node, slot);
            assert!(!child.is_none(), "unset link in {node:?} slot {slot}");
            assert_eq!(arena.parent(child), node, "parent of {child:?}");
            stack.push((child, depth + 1));
        }
    }

    assert_eq!(
        leaf_entries, inserted,
        "reachable leaf entries must match inserted signatures"
    );
}

fn build(order: usize, sigs: &[Signature], seed: u64) -> KTree {
    let capacity = 16 * sigs.len() + 16;
    let tree = KTree::new(order, capacity);
    let mut root_slot = FreeList::new(vec![ROOT_SLOT], capacity);
    let mut free = tree.arena().free_lists(1).pop().expect("one free list");
    let mut rng = StdRng::seed_from_u64(seed);
    for (i, &s) in sigs.iter().enumerate() {
        let list = if i == 0 { &mut root_slot } else { &mut free };
        tree.insert(s, list, &mut rng).expect("capacity covers every split");
    }
    tree
}

/// Insert the first signature alone, then the rest from `threads` scoped
/// threads, each with its own free list and a contiguous chunk.
fn build_parallel(order: usize, sigs: &[Signature], threads: usize, seed: u64) -> KTree {
    let capacity = 16 * sigs.len() + 16;
    let tree = KTree::new(order, capacity);
    let Some((&first, rest)) = sigs.split_first() else {
        return tree;
    };
    let mut rng = StdRng::seed_from_u64(seed);
    tree.insert(first, &mut FreeList::new(vec![ROOT_SLOT], capacity), &mut rng)
        .expect("root slot is free");

    let chunk = rest.len().div_ceil(threads).max(1);
    let free_lists = tree.arena().free_lists(threads);
    std::thread::scope(|s| {
        for (t, (mut free, batch)) in free_lists.into_iter().zip(rest.chunks(chunk)).enumerate() {
            let tree = &tree;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                for &sig in batch {
                    tree.insert(sig, &mut free, &mut rng)
                        .expect("capacity covers every split");
                }
            });
        }
    });
    tree
}

fn dna_strategy() -> impl Strategy<Value = Signature> {
    prop::collection::vec(prop::sample::select(b"ACGT".to_vec()), 1..=8)
        .prop_map(|seq| Signature::encode(&seq))
}

fn signature_strategy() -> impl Strategy<Value = Signature> {
    prop_oneof![
        3 => dna_strategy(),
        1 => any::<u64>().prop_map(Signature::new),
    ]
}

fn signatures_strategy() -> impl Strategy<Value = Vec<Signature>> {
    prop::collection::vec(signature_strategy(), 0..=400)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_distance_metric_basics(a in any::<u64>(), b in any::<u64>()) {
        let (a, b) = (Signature::new(a), Signature::new(b));
        prop_assert_eq!(distance(a, a), 0);
        prop_assert_eq!(distance(a, b), distance(b, a));
        prop_assert!(distance(a, b) <= 32);
        prop_assert_eq!(distance(a, b) == 0, a == b);
    }

    #[test]
    fn prop_single_worker_structure(
        sigs in signatures_strategy(),
        order in 2usize..=12,
        seed in any::<u64>(),
    ) {
        let tree = build(order, &sigs, seed);
        validate_tree(&tree, sigs.len());
        for &s in &sigs {
            let leaf = tree.traverse(s);
            prop_assert!(!tree.arena().is_branch(leaf));
            prop_assert_eq!(leaf, tree.traverse(s));
        }
    }

    #[test]
    fn prop_parallel_structure(
        sigs in signatures_strategy(),
        order in 2usize..=12,
        threads in 2usize..=8,
        seed in any::<u64>(),
    ) {
        let tree = build_parallel(order, &sigs, threads, seed);
        validate_tree(&tree, sigs.len());
        for &s in &sigs {
            prop_assert!(!tree.arena().is_branch(tree.traverse(s)));
        }
    }

    #[test]
    fn prop_bisect_two_groups_of_members(
        sigs in prop::collection::vec(signature_strategy(), 2..=40),
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let b = bisect::bisect(&sigs, &mut rng).unwrap();
        let [left, right] = b.sizes();
        prop_assert!(left > 0 && right > 0);
        prop_assert_eq!(left + right, sigs.len());
        for m in b.medoids {
            prop_assert!(sigs.contains(&m), "medoid {} is not an input", m);
        }
    }

    #[test]
    fn prop_cluster_ids_dense(
        sigs in signatures_strategy(),
        order in 2usize..=12,
        seed in any::<u64>(),
    ) {
        let config = Config::default()
            .with_order(order)
            .with_capacity(16 * sigs.len() + 16)
            .with_threads(1)
            .with_seed(seed);
        let result = cluster(&sigs, &config).unwrap();
        prop_assert_eq!(result.len(), sigs.len());
        let used: HashSet<usize> = result.assignments.iter().copied().collect();
        prop_assert_eq!(used.len(), result.cluster_count);
        prop_assert!(result.assignments.iter().all(|&id| id < result.cluster_count));
        if let Some(&first) = result.assignments.first() {
            prop_assert_eq!(first, 0);
        }
    }

    #[test]
    fn prop_compress_preserves_partition(ids in prop::collection::vec(0usize..50, 0..=200)) {
        let mut dense = ids.clone();
        let k = compress_cluster_ids(&mut dense);
        let distinct: HashSet<usize> = ids.iter().copied().collect();
        prop_assert_eq!(k, distinct.len());
        for i in 0..ids.len() {
            for j in 0..ids.len() {
                prop_assert_eq!(ids[i] == ids[j], dense[i] == dense[j]);
            }
        }
        // First appearances count up from zero.
        let mut next = 0;
        for &id in &dense {
            prop_assert!(id <= next);
            if id == next {
                next += 1;
            }
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_pair_order_keeps_pairs_together() {
    let a = Signature::encode(b"AAAA");
    let t = Signature::encode(b"TTTT");
    let config = Config::default()
        .with_order(2)
        .with_capacity(32)
        .with_threads(1);

    for_each_permutation(&[a, a, t, t], |perm| {
        for seed in 0..4 {
            let result = cluster(&perm, &config.clone().with_seed(seed)).unwrap();
            assert_eq!(result.cluster_count, 2, "{perm:?} seed {seed}");
            for i in 0..perm.len() {
                for j in 0..perm.len() {
                    assert_eq!(
                        perm[i] == perm[j],
                        result.assignments[i] == result.assignments[j],
                        "{perm:?} seed {seed}"
                    );
                }
            }
            validate_tree(&build(2, &perm, seed), perm.len());
        }
    });
}

#[test]
fn exhaustive_identical_inputs_terminate() {
    let s = Signature::encode(b"ACGTACGT");
    for n in 1..=12 {
        let sigs = vec![s; n];
        for order in 2..=4 {
            let tree = build(order, &sigs, n as u64);
            validate_tree(&tree, n);
        }
    }
}

#[test]
fn concurrent_inserts_with_heavy_duplicates_keep_structure() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    for order in [2, 3, 4, 10] {
        for round in 0..4 {
            // Only 256 distinct values, so most splits see repeats.
            let sigs: Vec<Signature> = (0..5_000)
                .map(|_| Signature::new(rng.gen::<u64>() & 0xFF))
                .collect();
            let tree = build_parallel(order, &sigs, 8, round);
            validate_tree(&tree, sigs.len());
            assert_eq!(tree.stats().entries, sigs.len(), "order {order} round {round}");
            for &s in &sigs {
                assert!(!tree.arena().is_branch(tree.traverse(s)));
            }
        }
    }
}
