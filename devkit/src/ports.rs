/*!
Allocation de ports libres pour les tests
*/

use anyhow::{bail, Result};
use std::net::TcpListener;

const MAX_ATTEMPTS: usize = 64;

/// Premier port d'une plage de `count` ports consécutifs libres sur 127.0.0.1
///
/// Les ports sont vérifiés puis relâchés : une autre application peut les
/// prendre entre-temps, les tests restent tolérants à ce cas.
pub fn free_port_block(count: u16) -> Result<u16> {
    for _ in 0..MAX_ATTEMPTS {
        let base = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let Some(last) = base.checked_add(count.saturating_sub(1)) else {
            continue;
        };
        let all_free = (base..=last).all(|port| TcpListener::bind(("127.0.0.1", port)).is_ok());
        if all_free {
            return Ok(base);
        }
    }
    bail!("no block of {count} free ports found after {MAX_ATTEMPTS} attempts")
}

pub fn free_port() -> Result<u16> {
    free_port_block(1)
}
