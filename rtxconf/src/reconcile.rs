//! Desired-versus-observed record reconciliation.
//!
//! After an apply, the device may echo records back in another order, with
//! a different identity than the one submitted, or alongside entries nobody
//! asked for. [`reconcile`] pairs the two lists in two explicit passes:
//!
//! 1. by primary identity key,
//! 2. by a feature-defined fallback tuple of stable attributes, for desired
//!    records the first pass could not place.
//!
//! Observed records claimed by neither pass are ghosts and never appear in
//! the normalized output. Every desired record gets exactly one [`Slot`];
//! unresolved ones are classified, not dropped.
//!
//! Indices are built per call from the lists passed in; nothing is cached.
//!
//! # Example
//!
//! ```rust
//! use rtxconf::feature::{DnsServer, DnsServerSelect};
//! use rtxconf::reconcile::reconcile;
//!
//! let desired = vec![DnsServerSelect::new(1, vec![DnsServer::new("10.0.0.1")], "example.com")];
//! let observed = vec![
//!     DnsServerSelect::new(7, vec![DnsServer::new("10.0.0.1")], "example.com"),
//!     DnsServerSelect::new(9, vec![DnsServer::new("10.0.0.9")], "."),
//! ];
//!
//! let result = reconcile(&desired, &observed);
//! assert!(result.slots[0].is_matched());
//! assert_eq!(result.ghosts.len(), 1);
//! assert_eq!(result.normalized().len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use log::debug;

/// A record that can be paired across desired and observed lists.
pub trait Reconcilable {
    /// Primary identity (ID, sequence number, or name).
    type Key: Eq + Hash + Clone + fmt::Debug;

    /// Secondary tuple of attributes that survive identity drift.
    type Fallback: Eq + Hash + Clone + fmt::Debug;

    /// The primary identity key.
    fn identity(&self) -> Self::Key;

    /// The fallback tuple, or `None` if this record cannot be matched by
    /// attributes.
    fn fallback_key(&self) -> Option<Self::Fallback>;

    /// Rewrite equivalent spellings in a matched observed record to the
    /// spelling used by the desired record.
    fn normalize_against(&mut self, _desired: &Self) {}
}

/// Why a desired record has no observed partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// Nothing matched by identity or fallback tuple.
    NotFound,

    /// The fallback tuple matched several unclaimed observed records
    /// (indices into the observed list).
    Ambiguous(Vec<usize>),
}

/// Outcome for one desired record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<R> {
    /// Paired by primary identity.
    MatchedWithKey { observed_index: usize, record: R },

    /// Paired by fallback tuple.
    MatchedByFallback { observed_index: usize, record: R },

    /// No partner; the desired record needs creating.
    Unmatched(Unresolved),
}

/// One desired record and its resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<R> {
    /// Index into the desired list.
    pub desired_index: usize,

    /// How the record was resolved.
    pub resolution: Resolution<R>,
}

impl<R> Slot<R> {
    /// The paired observed record, if any.
    pub fn observed(&self) -> Option<&R> {
        match &self.resolution {
            Resolution::MatchedWithKey { record, .. }
            | Resolution::MatchedByFallback { record, .. } => Some(record),
            Resolution::Unmatched(_) => None,
        }
    }

    /// Check whether either pass found a partner.
    pub fn is_matched(&self) -> bool {
        self.observed().is_some()
    }
}

/// An observed record with no desired partner.
#[derive(Debug, Clone, PartialEq)]
pub struct Ghost<R> {
    /// Index into the observed list.
    pub observed_index: usize,

    /// The unclaimed record.
    pub record: R,
}

/// Output of [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation<R> {
    /// One slot per desired record, in desired order.
    pub slots: Vec<Slot<R>>,

    /// Observed records nothing claimed, in observed order.
    pub ghosts: Vec<Ghost<R>>,
}

impl<R> Reconciliation<R> {
    /// Matched observed records in desired order. Ghosts and unmatched
    /// slots are left out.
    pub fn normalized(&self) -> Vec<&R> {
        self.slots.iter().filter_map(Slot::observed).collect()
    }

    /// Owned variant of [`normalized`](Self::normalized).
    pub fn into_normalized(self) -> Vec<R> {
        self.slots
            .into_iter()
            .filter_map(|slot| match slot.resolution {
                Resolution::MatchedWithKey { record, .. }
                | Resolution::MatchedByFallback { record, .. } => Some(record),
                Resolution::Unmatched(_) => None,
            })
            .collect()
    }

    /// Desired indices that need creating.
    pub fn unmatched(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .filter(|slot| !slot.is_matched())
            .map(|slot| slot.desired_index)
    }

    /// Check whether every desired record matched and nothing extra exists.
    pub fn is_converged(&self) -> bool {
        self.ghosts.is_empty() && self.slots.iter().all(Slot::is_matched)
    }
}

/// Pair desired records with observed ones.
///
/// Never fails: every desired record is classified and every unclaimed
/// observed record is reported as a ghost.
pub fn reconcile<R>(desired: &[R], observed: &[R]) -> Reconciliation<R>
where
    R: Reconcilable + Clone,
{
    let mut claimed = vec![false; observed.len()];
    let mut pairing: Vec<Option<(usize, bool)>> = vec![None; desired.len()];

    // Pass 1: identity. First observed record with a key wins.
    let mut by_key: HashMap<R::Key, usize> = HashMap::with_capacity(observed.len());
    for (index, record) in observed.iter().enumerate() {
        by_key.entry(record.identity()).or_insert(index);
    }
    for (d, record) in desired.iter().enumerate() {
        if let Some(&o) = by_key.get(&record.identity()) {
            if !claimed[o] {
                claimed[o] = true;
                pairing[d] = Some((o, true));
            }
        }
    }

    // Pass 2: fallback tuple over what pass 1 left unclaimed.
    let mut by_fallback: HashMap<R::Fallback, Vec<usize>> = HashMap::new();
    for (index, record) in observed.iter().enumerate() {
        if claimed[index] {
            continue;
        }
        if let Some(key) = record.fallback_key() {
            by_fallback.entry(key).or_default().push(index);
        }
    }

    let mut ambiguous: HashMap<usize, Vec<usize>> = HashMap::new();
    for (d, record) in desired.iter().enumerate() {
        if pairing[d].is_some() {
            continue;
        }
        let Some(key) = record.fallback_key() else {
            continue;
        };
        let candidates: Vec<usize> = by_fallback
            .get(&key)
            .map(|indices| indices.iter().copied().filter(|&o| !claimed[o]).collect())
            .unwrap_or_default();
        match candidates.as_slice() {
            [] => {}
            [o] => {
                claimed[*o] = true;
                pairing[d] = Some((*o, false));
            }
            _ => {
                ambiguous.insert(d, candidates);
            }
        }
    }

    let slots: Vec<Slot<R>> = desired
        .iter()
        .enumerate()
        .map(|(d, wanted)| {
            let resolution = match pairing[d] {
                Some((o, by_identity)) => {
                    let mut record = observed[o].clone();
                    record.normalize_against(wanted);
                    if by_identity {
                        Resolution::MatchedWithKey {
                            observed_index: o,
                            record,
                        }
                    } else {
                        Resolution::MatchedByFallback {
                            observed_index: o,
                            record,
                        }
                    }
                }
                None => match ambiguous.remove(&d) {
                    Some(candidates) => Resolution::Unmatched(Unresolved::Ambiguous(candidates)),
                    None => Resolution::Unmatched(Unresolved::NotFound),
                },
            };
            Slot {
                desired_index: d,
                resolution,
            }
        })
        .collect();

    let ghosts: Vec<Ghost<R>> = observed
        .iter()
        .enumerate()
        .filter(|(index, _)| !claimed[*index])
        .map(|(index, record)| Ghost {
            observed_index: index,
            record: record.clone(),
        })
        .collect();

    debug!(
        "reconciled {} desired against {} observed: {} matched, {} unmatched, {} ghosts",
        desired.len(),
        observed.len(),
        slots.iter().filter(|s| s.is_matched()).count(),
        slots.iter().filter(|s| !s.is_matched()).count(),
        ghosts.len()
    );

    Reconciliation { slots, ghosts }
}
