//! Person clustering over face embeddings.
//!
//! New faces are assigned online: nearest existing centroid by cosine
//! distance joins if within epsilon, otherwise a new person starts. Every
//! `RECLUSTER_EVERY` new faces a full density-based pass re-derives the
//! clustering from scratch to correct drift, preserving person identities by
//! majority face overlap.

use std::collections::HashMap;

use lumen_model::{FaceId, PersonId};
use parking_lot::RwLock;

/// Cosine distance within which a face joins an existing person.
pub const ASSIGN_EPSILON: f32 = 0.35;
/// Full re-cluster cadence, in newly added faces.
pub const RECLUSTER_EVERY: usize = 256;
/// DBSCAN neighbourhood radius (cosine distance) and density floor.
const DBSCAN_EPS: f32 = 0.35;
const DBSCAN_MIN_PTS: usize = 2;

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone)]
struct Centroid {
    person: PersonId,
    sum: Vec<f32>,
    count: usize,
}

impl Centroid {
    fn mean(&self) -> Vec<f32> {
        self.sum.iter().map(|v| v / self.count as f32).collect()
    }
}

#[derive(Debug, Default)]
struct State {
    centroids: Vec<Centroid>,
    /// All embeddings seen, for the periodic full re-cluster.
    faces: Vec<(FaceId, Vec<f32>, Option<PersonId>)>,
    since_recluster: usize,
}

/// The shared face-cluster centroid index. Writer lock for assignment,
/// read lock for inspection.
#[derive(Debug, Default)]
pub struct PersonIndex {
    state: RwLock<State>,
}

/// Outcome of an online assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Existing(PersonId),
    /// No centroid is close enough: the caller creates a person row in the
    /// catalog and registers the face under it via [`PersonIndex::record`].
    NewPerson,
}

impl PersonIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted faces (startup path).
    pub fn seed(&self, faces: impl IntoIterator<Item = (FaceId, Vec<f32>, Option<PersonId>)>) {
        let mut state = self.state.write();
        for (face_id, embedding, person) in faces {
            if let Some(person) = person {
                match state.centroids.iter_mut().find(|c| c.person == person) {
                    Some(centroid) => {
                        for (s, v) in centroid.sum.iter_mut().zip(embedding.iter()) {
                            *s += v;
                        }
                        centroid.count += 1;
                    }
                    None => state.centroids.push(Centroid {
                        person,
                        sum: embedding.clone(),
                        count: 1,
                    }),
                }
            }
            state.faces.push((face_id, embedding, person));
        }
    }

    /// Nearest-centroid assignment for one new face.
    pub fn assign(&self, embedding: &[f32]) -> Assignment {
        let state = self.state.read();
        let mut best: Option<(f32, PersonId)> = None;
        for centroid in &state.centroids {
            let distance = cosine_distance(&centroid.mean(), embedding);
            if distance <= ASSIGN_EPSILON && best.map(|(d, _)| distance < d).unwrap_or(true) {
                best = Some((distance, centroid.person));
            }
        }
        match best {
            Some((_, person)) => Assignment::Existing(person),
            None => Assignment::NewPerson,
        }
    }

    /// Record a face under an (existing or freshly created) person and
    /// report whether the bounded full re-cluster is due.
    pub fn record(&self, face_id: FaceId, embedding: Vec<f32>, person: PersonId) -> bool {
        let mut state = self.state.write();
        match state.centroids.iter_mut().find(|c| c.person == person) {
            Some(centroid) => {
                for (s, v) in centroid.sum.iter_mut().zip(embedding.iter()) {
                    *s += v;
                }
                centroid.count += 1;
            }
            None => state.centroids.push(Centroid {
                person,
                sum: embedding.clone(),
                count: 1,
            }),
        }
        state.faces.push((face_id, embedding, Some(person)));
        state.since_recluster += 1;
        state.since_recluster >= RECLUSTER_EVERY
    }

    /// Full density-based re-clustering over every known embedding.
    ///
    /// Returns the face → person reassignments to persist. Cluster identity
    /// is preserved by majority overlap with the previous assignment; noise
    /// points keep a singleton person so every face stays addressable.
    pub fn recluster<F>(&self, mut new_person: F) -> Vec<(FaceId, PersonId)>
    where
        F: FnMut() -> PersonId,
    {
        let mut state = self.state.write();
        state.since_recluster = 0;

        let embeddings: Vec<&[f32]> = state.faces.iter().map(|(_, e, _)| e.as_slice()).collect();
        let labels = dbscan(&embeddings, DBSCAN_EPS, DBSCAN_MIN_PTS);

        // Map each cluster label to the previous person with the largest
        // face overlap, falling back to a new person.
        let mut label_votes: HashMap<i64, HashMap<PersonId, usize>> = HashMap::new();
        for (i, label) in labels.iter().enumerate() {
            if let (Some(label), Some(prev)) = (label, state.faces[i].2) {
                *label_votes
                    .entry(*label)
                    .or_default()
                    .entry(prev)
                    .or_default() += 1;
            }
        }
        let mut label_person: HashMap<i64, PersonId> = HashMap::new();
        let mut taken: Vec<PersonId> = Vec::new();
        for (label, votes) in &label_votes {
            let winner = votes
                .iter()
                .filter(|(person, _)| !taken.contains(person))
                .max_by_key(|(_, count)| **count)
                .map(|(person, _)| *person);
            if let Some(person) = winner {
                label_person.insert(*label, person);
                taken.push(person);
            }
        }

        let mut assignments = Vec::with_capacity(state.faces.len());
        let mut noise_persons: HashMap<usize, PersonId> = HashMap::new();
        for (i, label) in labels.iter().enumerate() {
            let person = match label {
                Some(label) => *label_person.entry(*label).or_insert_with(&mut new_person),
                None => {
                    // Noise: keep the previous person or mint a singleton.
                    match state.faces[i].2 {
                        Some(prev) => prev,
                        None => *noise_persons.entry(i).or_insert_with(&mut new_person),
                    }
                }
            };
            assignments.push((state.faces[i].0, person));
        }

        // Rebuild centroids from the new assignment.
        let faces_snapshot: Vec<(Vec<f32>, PersonId)> = state
            .faces
            .iter()
            .zip(assignments.iter())
            .map(|((_, embedding, _), (_, person))| (embedding.clone(), *person))
            .collect();
        for ((_, _, prev), (_, person)) in state.faces.iter_mut().zip(assignments.iter()) {
            *prev = Some(*person);
        }
        state.centroids.clear();
        for (embedding, person) in faces_snapshot {
            match state.centroids.iter_mut().find(|c| c.person == person) {
                Some(centroid) => {
                    for (s, v) in centroid.sum.iter_mut().zip(embedding.iter()) {
                        *s += v;
                    }
                    centroid.count += 1;
                }
                None => state.centroids.push(Centroid {
                    person,
                    sum: embedding,
                    count: 1,
                }),
            }
        }

        assignments
    }

    /// Swap a person identity everywhere in the index (placeholder ids from
    /// a re-cluster become real catalog rows, merges collapse two persons).
    pub fn remap_person(&self, from: PersonId, to: PersonId) {
        let mut state = self.state.write();
        for centroid in &mut state.centroids {
            if centroid.person == from {
                centroid.person = to;
            }
        }
        for (_, _, person) in &mut state.faces {
            if *person == Some(from) {
                *person = Some(to);
            }
        }
    }

    /// Forget everything (clear-index support).
    pub fn clear(&self) {
        *self.state.write() = State::default();
    }

    pub fn face_count(&self) -> usize {
        self.state.read().faces.len()
    }

    pub fn person_count(&self) -> usize {
        self.state.read().centroids.len()
    }
}

/// Classic DBSCAN over cosine distance; O(n²) which is fine at the face
/// counts a personal library reaches between bounded re-cluster passes.
fn dbscan(points: &[&[f32]], eps: f32, min_pts: usize) -> Vec<Option<i64>> {
    let n = points.len();
    let mut labels: Vec<Option<i64>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut cluster = 0i64;

    let neighbours = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| j != i && cosine_distance(points[i], points[j]) <= eps)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let seeds = neighbours(i);
        if seeds.len() + 1 < min_pts {
            continue; // noise (may be adopted by a later cluster)
        }
        labels[i] = Some(cluster);
        let mut frontier = seeds;
        while let Some(j) = frontier.pop() {
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if !visited[j] {
                visited[j] = true;
                let next = neighbours(j);
                if next.len() + 1 >= min_pts {
                    frontier.extend(next);
                }
            }
        }
        cluster += 1;
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(direction: f32, jitter: f32) -> Vec<f32> {
        // Two orthogonal base directions blended by `direction`, plus a
        // small deterministic wobble.
        let mut v = vec![0.0f32; 8];
        v[0] = direction.cos() + jitter;
        v[1] = direction.sin() - jitter;
        v[2] = 0.1;
        v
    }

    #[test]
    fn cosine_distance_bounds() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!(cosine_distance(&a, &a) < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similar_faces_join_one_person() {
        let index = PersonIndex::new();
        assert_eq!(index.assign(&embedding(0.0, 0.0)), Assignment::NewPerson);

        let person = PersonId(1);
        index.record(FaceId(1), embedding(0.0, 0.0), person);
        assert_eq!(
            index.assign(&embedding(0.0, 0.01)),
            Assignment::Existing(person)
        );
    }

    #[test]
    fn distant_faces_start_new_persons() {
        let index = PersonIndex::new();
        index.record(FaceId(1), embedding(0.0, 0.0), PersonId(1));
        assert_eq!(
            index.assign(&embedding(std::f32::consts::FRAC_PI_2, 0.0)),
            Assignment::NewPerson
        );
    }

    #[test]
    fn recluster_preserves_identities_by_overlap() {
        let index = PersonIndex::new();
        let alice = PersonId(10);
        let bob = PersonId(20);
        for i in 0..3 {
            index.record(FaceId(i), embedding(0.0, i as f32 * 0.01), alice);
        }
        for i in 3..6 {
            index.record(
                FaceId(i),
                embedding(std::f32::consts::FRAC_PI_2, (i - 3) as f32 * 0.01),
                bob,
            );
        }

        let mut next = 100i64;
        let assignments = index.recluster(|| {
            next += 1;
            PersonId(next)
        });

        let of = |face: i64| {
            assignments
                .iter()
                .find(|(id, _)| id.0 == face)
                .map(|(_, p)| *p)
                .unwrap()
        };
        assert_eq!(of(0), alice);
        assert_eq!(of(1), alice);
        assert_eq!(of(4), bob);
        assert_ne!(of(0), of(4));
    }

    #[test]
    fn recluster_cadence_is_bounded() {
        let index = PersonIndex::new();
        let mut due = false;
        for i in 0..(RECLUSTER_EVERY as i64) {
            due = index.record(FaceId(i), embedding(0.0, 0.0), PersonId(1));
        }
        assert!(due);
        index.recluster(|| PersonId(999));
        assert!(!index.record(FaceId(9999), embedding(0.0, 0.0), PersonId(1)));
    }

    #[test]
    fn dbscan_separates_two_blobs_and_noise() {
        let blob_a: Vec<Vec<f32>> = (0..3).map(|i| embedding(0.0, i as f32 * 0.01)).collect();
        let blob_b: Vec<Vec<f32>> = (0..3)
            .map(|i| embedding(std::f32::consts::FRAC_PI_2, i as f32 * 0.01))
            .collect();
        let noise = embedding(std::f32::consts::PI, 0.3);

        let mut points: Vec<&[f32]> = Vec::new();
        for p in &blob_a {
            points.push(p);
        }
        for p in &blob_b {
            points.push(p);
        }
        points.push(&noise);

        let labels = dbscan(&points, DBSCAN_EPS, DBSCAN_MIN_PTS);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[6], None);
    }
}
