use crate::key::Key;
use crate::metadata::Signed;
use data_encoding::HEXLOWER;
use serde::Serialize;
use std::collections::HashMap;

/// Counts how many of `signed.signatures` are valid, unique-by-keyid signatures over
/// `signed`'s canonical form, verified against `keys` (typically the subset of a root's key
/// map delegated for this role).
///
/// Returns 0 if the canonical form can't be computed or a signature's hex is malformed, rather
/// than erroring, since an unverifiable signature is simply not counted.
pub fn count_valid_signatures<T: Serialize>(
    signed: &Signed<T>,
    keys: &HashMap<String, Key>,
) -> usize {
    let message = match signed.signed_bytes() {
        Ok(bytes) => bytes,
        Err(_) => return 0,
    };

    let mut seen = std::collections::HashSet::new();
    let mut valid = 0;
    for signature in &signed.signatures {
        if !seen.insert(signature.keyid.clone()) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            continue;
        };
        let Ok(sig_bytes) = HEXLOWER.decode(signature.sig.as_bytes()) else {
            continue;
        };
        if key.verify(&message, &sig_bytes) {
            valid += 1;
        }
    }
    valid
}

/// Whether at least `threshold` distinct keys in `keys` produced a valid signature over `signed`.
pub fn meets_threshold<T: Serialize>(
    signed: &Signed<T>,
    keys: &HashMap<String, Key>,
    threshold: u64,
) -> bool {
    count_valid_signatures(signed, keys) as u64 >= threshold
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::{Algorithm, PrivateKey};
    use crate::metadata::Signature;
    use data_encoding::HEXLOWER;
    use maplit::hashmap;
    use serde_json::json;

    #[test]
    fn counts_only_valid_unique_signatures() {
        let (priv_key, _doc) = PrivateKey::generate(Algorithm::Ed25519).unwrap();
        let public = priv_key.public_key();
        let key_id = public.key_id().unwrap();

        let signed = Signed {
            signed: json!({"a": 1}),
            signatures: vec![],
        };
        let message = signed.signed_bytes().unwrap();
        let sig = priv_key.sign(&message).unwrap();

        let signed = Signed {
            signed: json!({"a": 1}),
            signatures: vec![
                Signature {
                    keyid: key_id.clone(),
                    sig: HEXLOWER.encode(&sig),
                },
                // duplicate keyid must not count twice
                Signature {
                    keyid: key_id.clone(),
                    sig: HEXLOWER.encode(&sig),
                },
            ],
        };
        let keys = hashmap! { key_id => public };
        assert_eq!(count_valid_signatures(&signed, &keys), 1);
        assert!(meets_threshold(&signed, &keys, 1));
        assert!(!meets_threshold(&signed, &keys, 2));
    }
}
