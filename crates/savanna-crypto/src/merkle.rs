use crate::hash::hash_pair;
use savanna_types::Digest;

/// Binary Merkle tree over SHA-256.
///
/// An odd leaf at any level is hashed with itself, so every level has an
/// even pairing. Light clients replay the same construction over committed
/// finality data when checking inclusion proofs.
pub struct MerkleTree {
    leaves: Vec<Digest>,
    nodes: Vec<Digest>,
}

impl MerkleTree {
    /// Build a Merkle tree from leaf digests.
    pub fn from_leaves(leaves: &[Digest]) -> Self {
        if leaves.is_empty() {
            return Self {
                leaves: vec![],
                nodes: vec![],
            };
        }

        if leaves.len() == 1 {
            return Self {
                leaves: leaves.to_vec(),
                nodes: vec![leaves[0]],
            };
        }

        let mut nodes = Vec::new();
        let mut current_level: Vec<Digest> = leaves.to_vec();

        while current_level.len() > 1 {
            let mut next_level = Vec::new();

            for chunk in current_level.chunks(2) {
                let left = &chunk[0];
                let right = if chunk.len() == 2 { &chunk[1] } else { left };
                next_level.push(hash_pair(left, right));
            }

            nodes.extend(current_level.iter().cloned());
            current_level = next_level;
        }

        nodes.push(current_level[0]); // root

        Self {
            leaves: leaves.to_vec(),
            nodes,
        }
    }

    /// Root digest; zero for an empty tree.
    pub fn root(&self) -> Digest {
        self.nodes.last().copied().unwrap_or(Digest::ZERO)
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaves.len() {
            return None;
        }

        let leaf = self.leaves[index];
        let mut siblings = Vec::new();
        let mut current_index = index;
        let mut level_size = self.leaves.len();
        let mut offset = 0;

        while level_size > 1 {
            let sibling_index = if current_index % 2 == 0 {
                // an odd tail pairs with itself
                (current_index + 1).min(level_size - 1)
            } else {
                current_index - 1
            };
            siblings.push(self.nodes[offset + sibling_index]);

            current_index /= 2;
            offset += level_size;
            level_size = (level_size + 1) / 2;
        }

        Some(MerkleProof {
            leaf,
            index,
            siblings,
        })
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Merkle inclusion proof.
#[derive(Clone, Debug)]
pub struct MerkleProof {
    pub leaf: Digest,
    pub index: usize,
    pub siblings: Vec<Digest>,
}

impl MerkleProof {
    /// Verify this proof against an expected root.
    pub fn verify(&self, root: &Digest) -> bool {
        &self.compute_root() == root
    }

    /// Compute the root implied by this proof.
    pub fn compute_root(&self) -> Digest {
        let mut current = self.leaf;
        let mut index = self.index;

        for sibling in &self.siblings {
            if index % 2 == 0 {
                current = hash_pair(&current, sibling);
            } else {
                current = hash_pair(sibling, &current);
            }
            index /= 2;
        }

        current
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Digest> {
        (0..n)
            .map(|i| Digest::hash(format!("leaf{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::from_leaves(&[]);
        assert_eq!(tree.root(), Digest::ZERO);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = Digest::hash(b"single");
        let tree = MerkleTree::from_leaves(&[leaf]);
        assert_eq!(tree.root(), leaf);
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        let tree = MerkleTree::from_leaves(&l);
        assert_eq!(tree.root(), hash_pair(&l[0], &l[1]));
    }

    #[test]
    fn test_odd_leaf_hashed_with_itself() {
        let l = leaves(3);
        let tree = MerkleTree::from_leaves(&l);
        let expected = hash_pair(&hash_pair(&l[0], &l[1]), &hash_pair(&l[2], &l[2]));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_proofs_verify_for_all_leaves() {
        for n in [2usize, 3, 4, 5, 7, 8] {
            let l = leaves(n);
            let tree = MerkleTree::from_leaves(&l);
            for (i, leaf) in l.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert_eq!(proof.leaf, *leaf);
                assert!(proof.verify(&tree.root()), "n={n} i={i}");
                assert!(!proof.verify(&Digest::hash(b"wrong")));
            }
        }
    }

    #[test]
    fn test_proof_depth() {
        let tree = MerkleTree::from_leaves(&leaves(8));
        assert_eq!(tree.proof(0).unwrap().depth(), 3);
    }

    #[test]
    fn test_proof_out_of_bounds() {
        let tree = MerkleTree::from_leaves(&leaves(4));
        assert!(tree.proof(4).is_none());
    }

    #[test]
    fn test_deterministic() {
        let l = leaves(6);
        assert_eq!(
            MerkleTree::from_leaves(&l).root(),
            MerkleTree::from_leaves(&l).root()
        );
    }
}
