//! Simulation helpers for local fleets and tests.
//!
//! NOT CRYPTOGRAPHIC. [`derive_sim_pubkey`] turns a name into a stable,
//! well-formed pubkey so simulated agents keep their identity across runs.
//! Anyone who knows the name can reproduce the key. Real agents register with
//! keys they generated themselves.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::model::{ComputeType, NewAgent, PUBKEY_HEX_LEN};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Deterministic 64-hex-char pseudo pubkey for a simulated agent name.
pub fn derive_sim_pubkey(name: &str) -> String {
    let mut rng = StdRng::seed_from_u64(fnv1a(name.as_bytes()));
    let mut bytes = [0u8; PUBKEY_HEX_LEN / 2];
    rng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Registration for a simulated API agent at `endpoint`.
pub fn sim_agent(name: &str, endpoint: &str) -> NewAgent {
    NewAgent {
        pubkey: derive_sim_pubkey(name),
        name: name.to_string(),
        endpoint: endpoint.to_string(),
        compute_type: ComputeType::Api,
        declared_latency_ms: None,
        hardware: Some("simulated".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::validate_pubkey;

    #[test]
    fn same_name_same_key() {
        assert_eq!(derive_sim_pubkey("alpha"), derive_sim_pubkey("alpha"));
        assert_ne!(derive_sim_pubkey("alpha"), derive_sim_pubkey("beta"));
    }

    #[test]
    fn derived_keys_are_valid_pubkeys() {
        for name in ["alpha", "", "a much longer simulated agent name"] {
            assert!(validate_pubkey(&derive_sim_pubkey(name)).is_ok());
        }
    }
}
