//! Similarity clustering over logo fingerprints.
//!
//! Two fingerprints are linked when their distance under the run's
//! [`DistancePolicy`] is within the threshold, and clusters are the connected
//! components of that graph. Grouping is transitive: a chain of near
//! duplicates ends up in one cluster even when its ends are far apart.
//!
//! Every pair is compared, so the cost is quadratic in the number of
//! fingerprints.

use serde::Serialize;

use crate::{
    fingerprint::{DistancePolicy, Fingerprint, ImageHashes},
    types::DomainRecord,
};

pub const EXACT_MATCH_THRESHOLD: u32 = 0;
pub const NEAR_DUPLICATE_THRESHOLD: u32 = 5;
pub const SIMILAR_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: usize,
    pub domains: Vec<String>,
    /// Positions of the members in the clustered slice.
    #[serde(skip)]
    pub members: Vec<usize>,
    pub representative: String,
    #[serde(skip)]
    pub representative_hashes: ImageHashes,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.domains.len()
    }

    pub fn is_singleton(&self) -> bool {
        self.domains.len() == 1
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

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
}

#[derive(Debug, Clone, Copy)]
pub struct Clusterer {
    threshold: u32,
    policy: DistancePolicy,
}

impl Default for Clusterer {
    fn default() -> Self {
        Clusterer::new(NEAR_DUPLICATE_THRESHOLD, DistancePolicy::default())
    }
}

impl Clusterer {
    pub fn new(threshold: u32, policy: DistancePolicy) -> Self {
        Clusterer { threshold, policy }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn policy(&self) -> DistancePolicy {
        self.policy
    }

    pub fn is_match(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        self.policy.distance(&a.hashes, &b.hashes) <= self.threshold
    }

    /// Partitions `fingerprints` into clusters, largest first. Ties are broken
    /// by the position of each cluster's first member, and members keep their
    /// input order, so the output depends only on the input.
    pub fn cluster(&self, fingerprints: &[Fingerprint]) -> Vec<Cluster> {
        let n = fingerprints.len();
        let mut sets = DisjointSet::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                if self.is_match(&fingerprints[i], &fingerprints[j]) {
                    sets.union(i, j);
                }
            }
        }

        // components in order of their first member
        let mut slot_of_root = vec![usize::MAX; n];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = sets.find(i);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[slot_of_root[root]].push(i);
        }
        // stable sort keeps first-member order among equal sizes
        groups.sort_by(|a, b| b.len().cmp(&a.len()));

        let clusters: Vec<Cluster> = groups
            .into_iter()
            .enumerate()
            .map(|(id, members)| {
                let first = &fingerprints[members[0]];
                Cluster {
                    id,
                    domains: members
                        .iter()
                        .map(|&i| fingerprints[i].domain.clone())
                        .collect(),
                    representative: first.domain.clone(),
                    representative_hashes: first.hashes,
                    members,
                }
            })
            .collect();

        debug!(
            "clustered {} fingerprints into {} clusters (threshold {}, {})",
            n,
            clusters.len(),
            self.threshold,
            self.policy
        );
        clusters
    }

    /// Clusters the fingerprinted records; `members` index into `records`.
    pub fn cluster_records(&self, records: &[DomainRecord]) -> Vec<Cluster> {
        let (positions, fingerprints): (Vec<usize>, Vec<Fingerprint>) = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.fingerprint.clone().map(|fp| (i, fp)))
            .unzip();

        let mut clusters = self.cluster(&fingerprints);
        for c in clusters.iter_mut() {
            for m in c.members.iter_mut() {
                *m = positions[*m];
            }
        }
        clusters
    }
}
