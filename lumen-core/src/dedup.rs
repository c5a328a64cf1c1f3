//! Near-duplicate grouping: a dense-arena union-find over files keyed by
//! Hamming-closeness of their 64-bit perceptual hashes.
//!
//! Writers (the phash stage) take the write lock; the index is rebuilt from
//! the catalog at startup so groups survive restarts without being
//! authoritative state themselves.

use std::collections::HashMap;

use lumen_model::FileId;
use parking_lot::RwLock;

/// Default maximum Hamming distance for two pHashes to be considered
/// near-duplicates.
pub const HAMMING_THRESHOLD: u32 = 6;

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[derive(Debug, Default)]
struct Arena {
    parent: Vec<usize>,
    rank: Vec<u8>,
    hashes: Vec<u64>,
    ids: Vec<FileId>,
    index_of: HashMap<FileId, usize>,
}

impl Arena {
    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    fn insert(&mut self, id: FileId, hash: u64) -> usize {
        if let Some(&idx) = self.index_of.get(&id) {
            self.hashes[idx] = hash;
            return idx;
        }
        let idx = self.parent.len();
        self.parent.push(idx);
        self.rank.push(0);
        self.hashes.push(hash);
        self.ids.push(id.clone());
        self.index_of.insert(id, idx);
        idx
    }

    /// Representative id of a set: the lexicographically smallest member, so
    /// group identity is stable regardless of insertion order.
    fn representative(&mut self, root: usize) -> FileId {
        let roots: Vec<usize> = (0..self.ids.len()).map(|i| self.find(i)).collect();
        let mut best: Option<&FileId> = None;
        for (i, &r) in roots.iter().enumerate() {
            if r == root {
                match best {
                    Some(current) if current <= &self.ids[i] => {}
                    _ => best = Some(&self.ids[i]),
                }
            }
        }
        best.cloned().unwrap_or_else(|| self.ids[root].clone())
    }

    fn members(&mut self, root: usize) -> Vec<FileId> {
        let roots: Vec<usize> = (0..self.ids.len()).map(|i| self.find(i)).collect();
        roots
            .into_iter()
            .enumerate()
            .filter(|&(_, r)| r == root)
            .map(|(i, _)| self.ids[i].clone())
            .collect()
    }
}

/// Shared duplicate index. One per process, owned by the supervisor.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    arena: RwLock<Arena>,
    threshold: u32,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::with_threshold(HAMMING_THRESHOLD)
    }

    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            threshold,
        }
    }

    /// Rebuild from persisted hashes (startup path).
    pub fn seed(&self, entries: impl IntoIterator<Item = (FileId, u64)>) {
        let mut arena = self.arena.write();
        let mut fresh: Vec<usize> = Vec::new();
        for (id, hash) in entries {
            fresh.push(arena.insert(id, hash));
        }
        for idx in fresh {
            let hash = arena.hashes[idx];
            for other in 0..arena.hashes.len() {
                if other != idx && hamming(hash, arena.hashes[other]) <= self.threshold {
                    arena.union(idx, other);
                }
            }
        }
    }

    /// Insert a newly hashed file, union it with every Hamming-close entry,
    /// and return the group assignments that changed: the new file's group
    /// plus any member whose representative moved because groups merged.
    pub fn insert(&self, id: FileId, hash: u64) -> Vec<(FileId, FileId)> {
        let mut arena = self.arena.write();
        let idx = arena.insert(id, hash);

        for other in 0..arena.hashes.len() {
            if other != idx && hamming(hash, arena.hashes[other]) <= self.threshold {
                arena.union(idx, other);
            }
        }

        let root = arena.find(idx);
        let group = arena.representative(root);
        arena
            .members(root)
            .into_iter()
            .map(|member| (member, group.clone()))
            .collect()
    }

    /// Group representative for a file, if it has been hashed.
    pub fn group_of(&self, id: &FileId) -> Option<FileId> {
        let mut arena = self.arena.write();
        let idx = *arena.index_of.get(id)?;
        let root = arena.find(idx);
        Some(arena.representative(root))
    }

    /// Forget everything (clear-index support).
    pub fn clear(&self) {
        *self.arena.write() = Arena::default();
    }

    pub fn len(&self) -> usize {
        self.arena.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
