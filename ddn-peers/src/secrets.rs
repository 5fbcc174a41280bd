//! Secret pool and contiguous sharding across peers
//!
//! A pool of `N` forging secrets is split into `P` contiguous slices. With
//! `base = N / P` and `rem = N % P`, peers `1..=rem` receive `base + 1`
//! secrets and the rest receive `base`, in pool order.

use crate::error::{PeerError, Result};
use serde::Serialize;
use std::path::Path;

/// Ordered forging secrets shared by the whole fleet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretPool {
    tokens: Vec<String>,
}

/// Half-open slice `[start, end)` of the pool owned by one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecretShard {
    pub peer_index: u32,
    pub start: usize,
    pub end: usize,
    pub count: usize,
}

impl SecretPool {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// Read a pool file: either a JSON array of strings or one token per line.
    ///
    /// Line form tolerates the quoting and trailing commas left over from
    /// copying a JavaScript array literal.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PeerError::io(path, e))?;
        if text.trim_start().starts_with('[') {
            let tokens: Vec<String> = serde_json::from_str(&text).map_err(|e| PeerError::ConfigParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            return Ok(Self::new(tokens));
        }
        let tokens = text
            .lines()
            .map(clean_token)
            .filter(|t| !t.is_empty())
            .collect();
        Ok(Self::new(tokens))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Tokens covered by `shard`, in pool order
    pub fn slice(&self, shard: &SecretShard) -> &[String] {
        &self.tokens[shard.start..shard.end]
    }

    /// Shard of this pool owned by `peer_index`
    pub fn shard_for(&self, peer_count: u32, peer_index: u32) -> Result<SecretShard> {
        shard(self.len(), peer_count, peer_index)
    }
}

fn clean_token(line: &str) -> String {
    line.trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string()
}

/// Compute the shard of a pool of `pool_len` secrets owned by `peer_index`.
pub fn shard(pool_len: usize, peer_count: u32, peer_index: u32) -> Result<SecretShard> {
    if peer_count < 1 {
        return Err(PeerError::InvalidPeerCount(peer_count));
    }
    if peer_index < 1 || peer_index > peer_count {
        return Err(PeerError::InvalidPeerIndex {
            index: peer_index,
            peer_count,
        });
    }

    let peers = peer_count as usize;
    let idx = peer_index as usize;
    let base = pool_len / peers;
    let rem = pool_len % peers;

    let (start, count) = if idx <= rem {
        ((idx - 1) * (base + 1), base + 1)
    } else {
        (rem * (base + 1) + (idx - rem - 1) * base, base)
    };

    Ok(SecretShard {
        peer_index,
        start,
        end: start + count,
        count,
    })
}

/// Shards for every peer of a fleet, in index order
pub fn shard_all(pool_len: usize, peer_count: u32) -> Result<Vec<SecretShard>> {
    (1..=peer_count.max(1))
        .map(|i| shard(pool_len, peer_count, i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(n: usize, p: u32) -> Vec<usize> {
        shard_all(n, p).unwrap().iter().map(|s| s.count).collect()
    }

    fn bounds(n: usize, p: u32) -> Vec<(usize, usize)> {
        shard_all(n, p).unwrap().iter().map(|s| (s.start, s.end)).collect()
    }

    #[test]
    fn twenty_four_over_five() {
        assert_eq!(counts(24, 5), vec![5, 5, 5, 5, 4]);
        assert_eq!(bounds(24, 5), vec![(0, 5), (5, 10), (10, 15), (15, 20), (20, 24)]);
    }

    #[test]
    fn hundred_and_one_over_five() {
        assert_eq!(counts(101, 5), vec![21, 20, 20, 20, 20]);
    }

    #[test]
    fn ten_over_three() {
        assert_eq!(counts(10, 3), vec![4, 3, 3]);
        assert_eq!(bounds(10, 3), vec![(0, 4), (4, 7), (7, 10)]);
    }

    #[test]
    fn empty_pool_yields_empty_shards() {
        for s in shard_all(0, 5).unwrap() {
            assert_eq!((s.start, s.end, s.count), (0, 0, 0));
        }
    }

    #[test]
    fn single_peer_takes_everything() {
        let s = shard(10, 1, 1).unwrap();
        assert_eq!((s.start, s.end, s.count), (0, 10, 10));
    }

    #[test]
    fn shards_partition_the_pool() {
        for n in 0..60usize {
            for p in 1..12u32 {
                let shards = shard_all(n, p).unwrap();
                assert_eq!(shards.iter().map(|s| s.count).sum::<usize>(), n, "N={n} P={p}");
                assert_eq!(shards[0].start, 0);
                assert_eq!(shards.last().unwrap().end, n);
                for pair in shards.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start, "N={n} P={p}");
                }

                let max = shards.iter().map(|s| s.count).max().unwrap();
                let min = shards.iter().map(|s| s.count).min().unwrap();
                assert!(max - min <= 1);
                let rem = n % p as usize;
                for s in &shards {
                    let larger = (s.peer_index as usize) <= rem;
                    assert_eq!(s.count == n / p as usize + 1, larger, "N={n} P={p} peer={}", s.peer_index);
                }
            }
        }
    }

    #[test]
    fn misuse_is_reported() {
        assert!(matches!(shard(10, 0, 1), Err(PeerError::InvalidPeerCount(0))));
        assert!(matches!(shard(10, 3, 0), Err(PeerError::InvalidPeerIndex { index: 0, .. })));
        assert!(matches!(shard(10, 3, 4), Err(PeerError::InvalidPeerIndex { index: 4, .. })));
    }

    #[test]
    fn slice_preserves_pool_order() {
        let pool = SecretPool::new((0..10).map(|i| format!("secret {i}")).collect());
        let s = pool.shard_for(3, 2).unwrap();
        assert_eq!(pool.slice(&s), ["secret 4", "secret 5", "secret 6"]);
    }

    #[test]
    fn loads_line_and_json_pool_files() {
        let dir = tempfile::tempdir().unwrap();

        let lines = dir.path().join("secrets.txt");
        std::fs::write(&lines, "'alpha one',\n  \"beta two\",\n\ngamma three\n").unwrap();
        let pool = SecretPool::load(&lines).unwrap();
        assert_eq!(pool.tokens(), ["alpha one", "beta two", "gamma three"]);

        let json = dir.path().join("secrets.json");
        std::fs::write(&json, r#"["a", "b"]"#).unwrap();
        assert_eq!(SecretPool::load(&json).unwrap().len(), 2);
    }
}
