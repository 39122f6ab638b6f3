//! Medoid bisection: the local two-way clustering run when a node overflows.
//!
//! Given the `order + 1` signatures of an overfull node, pick two random
//! distinct representatives, then alternate assignment and representative
//! refresh for a fixed number of rounds:
//!
//! 1. every entry joins the representative it is closest to (ties go to 0);
//! 2. if that puts everything in one group, entries are dealt out by index
//!    parity instead, so both groups are always populated;
//! 3. each group's representative becomes its medoid.
//!
//! Representatives are always existing members, never synthesized
//! consensus signatures.

use rand::Rng;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::signature::Signature;

/// Assignment/refresh rounds per split.
pub const ITERATIONS: usize = 4;

/// Group tags, one per entry.
pub type Groups = SmallVec<[u8; 16]>;

/// Result of splitting a set of entries in two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bisection {
    /// `groups[i]` is 0 or 1, the group of entry `i`.
    pub groups: Groups,
    /// Representative (medoid) of each group.
    pub medoids: [Signature; 2],
}

impl Bisection {
    /// Entry positions belonging to `group`, in input order.
    pub fn members(&self, group: u8) -> impl Iterator<Item = usize> + '_ {
        self.groups
            .iter()
            .enumerate()
            .filter(move |&(_, &g)| g == group)
            .map(|(i, _)| i)
    }

    /// Number of entries in each group.
    pub fn sizes(&self) -> [usize; 2] {
        let ones = self.groups.iter().filter(|&&g| g == 1).count();
        [self.groups.len() - ones, ones]
    }
}

/// Split `entries` into two non-empty groups.
///
/// `entries` must hold at least two signatures.
pub fn bisect<R: Rng + ?Sized>(entries: &[Signature], rng: &mut R) -> Result<Bisection> {
    debug_assert!(entries.len() >= 2, "bisecting {} entries", entries.len());

    let mut medoids = seed(entries, rng)?;
    let mut groups: Groups = SmallVec::from_elem(0, entries.len());
    let mut scratch: SmallVec<[Signature; 16]> = SmallVec::new();

    for _ in 0..ITERATIONS {
        assign(entries, &medoids, &mut groups);
        for (group, rep) in medoids.iter_mut().enumerate() {
            scratch.clear();
            scratch.extend(
                entries
                    .iter()
                    .zip(&groups)
                    .filter(|&(_, &g)| usize::from(g) == group)
                    .map(|(&s, _)| s),
            );
            if let Some(m) = medoid(&scratch) {
                *rep = m;
            }
        }
    }

    Ok(Bisection { groups, medoids })
}

/// Draw up to `entries.len()` random entries looking for two distinct
/// values, then fall back to the first entry that differs from the first
/// draw. Only when every entry is identical are both representatives the
/// same value, and the parity fallback in [`assign`] does the splitting.
fn seed<R: Rng + ?Sized>(entries: &[Signature], rng: &mut R) -> Result<[Signature; 2]> {
    let n = entries.len();
    if n == 0 {
        return Err(Error::SeedInvariant { entries: 0 });
    }
    let first = entries[rng.gen_range(0..n)];
    for _ in 1..n {
        let candidate = entries[rng.gen_range(0..n)];
        if candidate != first {
            return Ok([first, candidate]);
        }
    }
    // Bounded draws can miss a lone outlier. Equal seeds only for
    // all-identical input.
    match entries.iter().find(|&&e| e != first) {
        Some(&other) => Ok([first, other]),
        None => Ok([first, first]),
    }
}

fn assign(entries: &[Signature], reps: &[Signature; 2], groups: &mut Groups) {
    let mut counts = [0usize; 2];
    for (g, &e) in groups.iter_mut().zip(entries) {
        *g = u8::from(e.distance(reps[1]) < e.distance(reps[0]));
        counts[usize::from(*g)] += 1;
    }
    if counts[0] == 0 || counts[1] == 0 {
        for (i, g) in groups.iter_mut().enumerate() {
            *g = (i % 2) as u8;
        }
    }
}

/// The member with the lowest average distance to the other members.
///
/// Each member is compared against every *other position*, so duplicates
/// still count against each other. Ties keep the earliest member. Returns
/// `None` for fewer than two members, where no average exists.
pub fn medoid(members: &[Signature]) -> Option<Signature> {
    if members.len() < 2 {
        return None;
    }
    // Every average shares the denominator `len - 1`; compare sums.
    let mut best: Option<(u64, Signature)> = None;
    for (i, &candidate) in members.iter().enumerate() {
        let total: u64 = members
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, &other)| u64::from(candidate.distance(other)))
            .sum();
        if best.map_or(true, |(t, _)| total < t) {
            best = Some((total, candidate));
        }
    }
    best.map(|(_, sig)| sig)
}
