//! Mapping of directory identifiers onto local uid/gid values

use sha2::{Digest, Sha256};

/// Lowest id handed out, above the usual system account range
pub const LOCAL_ID_BASE: u32 = 2000;

/// Largest offset from [`LOCAL_ID_BASE`] a derived id can have
pub const LOCAL_ID_SPAN: u32 = u16::MAX as u32 / 2;

/// Derive the local numeric id for a directory identifier.
///
/// The last two bytes of the SHA-256 digest of the identifier are read as a
/// big-endian `u16`, halved, and offset by [`LOCAL_ID_BASE`]. Every host computes
/// the same value for the same identifier, so nothing has to be stored.
///
/// Distinct identifiers can map to the same id; collisions are neither detected
/// nor resolved.
pub fn derive_local_id(remote_id: &str) -> u32 {
    let digest = Sha256::digest(remote_id.as_bytes());
    let tail = u16::from_be_bytes([digest[digest.len() - 2], digest[digest.len() - 1]]);

    LOCAL_ID_BASE + u32::from(tail / 2)
}

/// Range every derived id falls into
pub fn local_id_range() -> std::ops::RangeInclusive<u32> {
    LOCAL_ID_BASE..=LOCAL_ID_BASE + LOCAL_ID_SPAN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_ids() {
        assert_eq!(derive_local_id("AIDAJQABLZS4A3QDU576Q"), 17312);
        assert_eq!(derive_local_id("AGPAIOSFODNN7EXAMPLE"), 22116);
        assert_eq!(derive_local_id(""), 25594);
    }

    #[test]
    fn test_deterministic() {
        let first = derive_local_id("AGPAJ2EXAMPLEGROUP");
        for _ in 0..10 {
            assert_eq!(derive_local_id("AGPAJ2EXAMPLEGROUP"), first);
        }
    }

    #[test]
    fn test_range() {
        assert_eq!(local_id_range(), 2000..=34767);

        for i in 0..5000 {
            let id = derive_local_id(&format!("AIDA{:016}", i));
            assert!(local_id_range().contains(&id), "{} out of range", id);
        }
    }

    #[test]
    fn test_collisions_are_possible() {
        // 40k inputs into 32768 slots must share at least one id
        let mut seen = std::collections::HashSet::new();
        let collided = (0..40_000).any(|i| !seen.insert(derive_local_id(&format!("id-{}", i))));
        assert!(collided);
    }
}
