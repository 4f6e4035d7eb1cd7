//! # Sequence Reconciliation
//!
//! Computes the add / remove / move operations that turn one ordered sequence
//! into another under a caller-supplied equality predicate.
//!
//! The correspondence is a common subsequence found by a single left-to-right
//! scan over `from`. For every position the scan looks for the nearest
//! unconsumed match in `to` at or after the last match, remembering per
//! equivalence class where the previous search for that class stopped. The
//! result is one valid common subsequence, not necessarily the longest; the
//! replay contract below holds either way.
//!
//! Replaying a [`Diff`] on a copy of `from`:
//! 1. remove every `removed` entry at `from_index` (back to front),
//! 2. insert every `added` entry at `to_index` (front to back),
//! 3. apply every `moved` entry as `remove(move_from)` + `insert(insert_at)`,
//!
//! yields a sequence equal to `to` under the predicate.
//!
//! The predicate must be an equivalence relation. Anything else still
//! produces a diff that replays without panicking, but its contents are
//! unspecified.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Added<T> {
    pub item: T,
    pub to_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removed<T> {
    pub item: T,
    pub from_index: usize,
}

/// A physical relocation performed after removals and insertions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Moved<T> {
    pub item: T,
    /// Index in `from`; `None` when the relocated entry was inserted by this
    /// diff and later displaced by an earlier relocation.
    pub from_index: Option<usize>,
    pub to_index: usize,
    /// Position in the working sequence before the splice.
    pub move_from: usize,
    /// Position in the working sequence after the splice.
    pub insert_at: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexChanged<T> {
    pub item: T,
    pub from_index: usize,
    pub to_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Mapping<T> {
    #[serde(rename_all = "camelCase")]
    New { item: T, to_index: usize },
    #[serde(rename_all = "camelCase")]
    Moved {
        item: T,
        from_index: usize,
        to_index: usize,
    },
    #[serde(rename_all = "camelCase")]
    Unchanged {
        item: T,
        from_index: usize,
        to_index: usize,
    },
    #[serde(rename_all = "camelCase")]
    Removed { item: T, from_index: usize },
}

impl<T> Mapping<T> {
    pub fn from_index(&self) -> Option<usize> {
        match self {
            Mapping::New { .. } => None,
            Mapping::Moved { from_index, .. }
            | Mapping::Unchanged { from_index, .. }
            | Mapping::Removed { from_index, .. } => Some(*from_index),
        }
    }

    pub fn to_index(&self) -> Option<usize> {
        match self {
            Mapping::New { to_index, .. }
            | Mapping::Moved { to_index, .. }
            | Mapping::Unchanged { to_index, .. } => Some(*to_index),
            Mapping::Removed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff<T> {
    /// Front to back.
    pub added: Vec<Added<T>>,
    /// Back to front.
    pub removed: Vec<Removed<T>>,
    /// In application order.
    pub moved: Vec<Moved<T>>,
    pub index_changed: Vec<IndexChanged<T>>,
    /// One entry per `to` position, then the `Removed` leftovers.
    pub mapping: Vec<Mapping<T>>,
}

impl<T> Diff<T> {
    /// True when replaying the diff would not touch the sequence.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty()
    }

    /// Replay the diff onto `target`, which must be laid out like `from`.
    ///
    /// `create` builds the element stored for each added entry. Out of range
    /// positions are clamped instead of panicking.
    pub fn replay<U>(&self, target: &mut Vec<U>, mut create: impl FnMut(&Added<T>) -> U) {
        for removed in &self.removed {
            if removed.from_index < target.len() {
                target.remove(removed.from_index);
            }
        }
        for added in &self.added {
            let at = added.to_index.min(target.len());
            target.insert(at, create(added));
        }
        for moved in &self.moved {
            if moved.move_from < target.len() {
                let entry = target.remove(moved.move_from);
                let at = moved.insert_at.min(target.len());
                target.insert(at, entry);
            }
        }
    }
}

/// Replay `diff` on a copy of `from`.
pub fn apply<T: Clone>(from: &[T], diff: &Diff<T>) -> Vec<T> {
    let mut out = from.to_vec();
    diff.replay(&mut out, |added| added.item.clone());
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMON SUBSEQUENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Strictly increasing `(from_index, to_index)` pairs of equal entries.
fn common_subsequence<T, F>(x: &[T], y: &[T], equals: &F) -> Vec<(usize, usize)>
where
    F: Fn(&T, &T) -> bool,
{
    let (m, n) = (x.len(), y.len());
    if m == 0 || n == 0 {
        return Vec::new();
    }

    // Representative index of each entry's equivalence class.
    let mut class = Vec::with_capacity(m);
    for i in 0..m {
        let representative = (0..i).find(|&j| equals(&x[j], &x[i])).map_or(i, |j| class[j]);
        class.push(representative);
    }

    // Where the last search for each class stopped.
    let mut searched: Vec<Option<usize>> = vec![None; m];
    let mut next_match = |index: usize, floor: usize| -> usize {
        if index >= m {
            return n;
        }
        let key = class[index];
        let start = match searched[key] {
            Some(last) if last + 1 > floor => last + 1,
            _ => floor,
        };
        let found = (start..n).find(|&j| equals(&x[index], &y[j])).unwrap_or(n);
        searched[key] = Some(found);
        found
    };

    let mut pairs: Vec<(usize, usize)> = Vec::new();
    let mut floor = 0;
    let mut lookahead = next_match(0, floor);
    let mut reuse_lookahead = true;
    let mut i = 0;
    while i < m {
        let current = if reuse_lookahead {
            lookahead
        } else {
            next_match(i, floor)
        };
        lookahead = next_match(i + 1, floor);

        // Skip this entry when the next one matches earlier.
        let target = if current > lookahead {
            i += 1;
            lookahead
        } else {
            current
        };

        let increasing = pairs.last().map_or(true, |&(_, last)| target > last);
        if target < n && i < m && increasing {
            floor = target;
            pairs.push((i, target));
            // The lookahead belongs to entry `i + 1` only if `i` was not skipped.
            reuse_lookahead = target == current;
        } else {
            reuse_lookahead = false;
        }
        i += 1;
    }
    pairs
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECONCILE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
enum Source {
    Unchanged(usize),
    Moved(usize),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    From(usize),
    Added(usize),
}

pub fn reconcile<T, F>(from: &[T], to: &[T], equals: F) -> Diff<T>
where
    T: Clone,
    F: Fn(&T, &T) -> bool,
{
    let common = common_subsequence(from, to, &equals);

    let mut kept = vec![false; from.len()];
    let mut sources: Vec<Option<Source>> = vec![None; to.len()];
    for &(f, t) in &common {
        kept[f] = true;
        sources[t] = Some(Source::Unchanged(f));
    }

    // Pair leftover removals with equal leftover additions.
    let mut unpaired: Vec<usize> = (0..to.len()).filter(|&t| sources[t].is_none()).collect();
    let mut leftover: Vec<usize> = Vec::new();
    for f in (0..from.len()).filter(|&f| !kept[f]) {
        match unpaired.iter().position(|&t| equals(&from[f], &to[t])) {
            Some(pos) => {
                let t = unpaired.remove(pos);
                sources[t] = Some(Source::Moved(f));
            }
            None => leftover.push(f),
        }
    }

    let mut mapping = Vec::with_capacity(to.len() + leftover.len());
    let mut index_changed = Vec::new();
    let mut added = Vec::new();
    for (t, source) in sources.iter().enumerate() {
        let item = to[t].clone();
        match *source {
            None => {
                added.push(Added {
                    item: item.clone(),
                    to_index: t,
                });
                mapping.push(Mapping::New { item, to_index: t });
            }
            Some(Source::Moved(f)) => {
                if f != t {
                    index_changed.push(IndexChanged {
                        item: item.clone(),
                        from_index: f,
                        to_index: t,
                    });
                }
                mapping.push(Mapping::Moved {
                    item,
                    from_index: f,
                    to_index: t,
                });
            }
            Some(Source::Unchanged(f)) => {
                if f != t {
                    index_changed.push(IndexChanged {
                        item: item.clone(),
                        from_index: f,
                        to_index: t,
                    });
                }
                mapping.push(Mapping::Unchanged {
                    item,
                    from_index: f,
                    to_index: t,
                });
            }
        }
    }
    for &f in &leftover {
        mapping.push(Mapping::Removed {
            item: from[f].clone(),
            from_index: f,
        });
    }

    let removed: Vec<Removed<T>> = leftover
        .iter()
        .rev()
        .map(|&f| Removed {
            item: from[f].clone(),
            from_index: f,
        })
        .collect();

    // Simulate removals and insertions, then splice out-of-place entries
    // into position one target index at a time.
    let mut simulated: Vec<Slot> = (0..from.len()).map(Slot::From).collect();
    for entry in &removed {
        simulated.remove(entry.from_index);
    }
    for entry in &added {
        simulated.insert(entry.to_index, Slot::Added(entry.to_index));
    }

    let mut moved = Vec::new();
    for (t, source) in sources.iter().enumerate() {
        let expected = match *source {
            Some(Source::Unchanged(f)) | Some(Source::Moved(f)) => Slot::From(f),
            None => Slot::Added(t),
        };
        if simulated.get(t) == Some(&expected) {
            continue;
        }
        let Some(position) = simulated.iter().skip(t).position(|s| *s == expected) else {
            continue;
        };
        let position = position + t;
        let slot = simulated.remove(position);
        simulated.insert(t, slot);
        moved.push(Moved {
            item: to[t].clone(),
            from_index: match slot {
                Slot::From(f) => Some(f),
                Slot::Added(_) => None,
            },
            to_index: t,
            move_from: position,
            insert_at: t,
        });
    }

    Diff {
        added,
        removed,
        moved,
        index_changed,
        mapping,
    }
}

/// Reconcile with `PartialEq` as the predicate.
pub fn reconcile_eq<T: Clone + PartialEq>(from: &[T], to: &[T]) -> Diff<T> {
    reconcile(from, to, |a, b| a == b)
}
