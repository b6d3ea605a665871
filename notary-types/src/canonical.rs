use crate::error::{self, Result};
use serde::Serialize;
use snafu::ResultExt;

/// Serializes `value` as canonical JSON: object keys sorted lexicographically by UTF-16
/// code-unit order, no insignificant whitespace, numbers as the shortest round-trip decimal.
///
/// Used both to compute the bytes that get signed (the `signed` sub-object of a role) and to
/// compute a key's `key_id` (the SHA-256 of its canonical-JSON public record).
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, olpc_cjson::CanonicalFormatter::new());
    value.serialize(&mut ser).context(error::CanonicalizeSnafu)?;
    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys() {
        let v = json!({"b": 1, "a": 2});
        let bytes = to_canonical_bytes(&v).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":2,"b":1}"#);
    }
}
