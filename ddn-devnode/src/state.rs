/**
 * ÉTAT DE LA CHAÎNE - Hauteur et horodatage du dernier bloc
 *
 * RÔLE : État partagé entre le producteur de blocs et l'API HTTP.
 * En mode gelé, la hauteur n'avance plus et le dernier bloc date d'une heure,
 * ce qui simule un nœud vivant mais bloqué.
 */

use parking_lot::Mutex;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Âge du dernier bloc annoncé par un nœud gelé
pub const FROZEN_AGE: Duration = Duration::hours(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub height: u64,
    pub last_block: OffsetDateTime,
    pub frozen: bool,
}

impl ChainState {
    pub fn genesis(now: OffsetDateTime, frozen: bool) -> Self {
        let last_block = if frozen { now - FROZEN_AGE } else { now };
        Self {
            height: 1,
            last_block,
            frozen,
        }
    }

    /// Produit un bloc ; sans effet si le nœud est gelé
    pub fn forge(&mut self, now: OffsetDateTime) -> bool {
        if self.frozen {
            return false;
        }
        self.height += 1;
        self.last_block = now;
        true
    }

    pub fn block_time(&self) -> i64 {
        self.last_block.unix_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forging_advances_height() {
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let mut chain = ChainState::genesis(t0, false);
        assert!(chain.forge(t0 + Duration::seconds(10)));
        assert_eq!(chain.height, 2);
        assert_eq!(chain.block_time(), 1_700_000_010);
    }

    #[test]
    fn frozen_chain_stays_an_hour_behind() {
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let mut chain = ChainState::genesis(t0, true);
        assert!(!chain.forge(t0 + Duration::seconds(10)));
        assert_eq!(chain.height, 1);
        assert_eq!(chain.block_time(), 1_700_000_000 - 3600);
    }
}
