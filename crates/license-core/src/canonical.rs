//! # Canonical Serialization — RFC 8785 (JCS)
//!
//! This module defines [`CanonicalBytes`], the sole construction path for the
//! bytes that every signature and MAC in the trust plane is computed over.
//! Signer and verifier must derive their bytes from the same logical value
//! through the same path, or verification is meaningless even when both
//! sides are individually correct.
//!
//! Serialization itself is delegated to `serde_json_canonicalizer`, which
//! implements RFC 8785 (JSON Canonicalization Scheme) directly over
//! `serde_json`: sorted object keys, compact separators, and the ECMA-262
//! number-to-string algorithm for numeric values. This crate does not
//! reimplement any of that — every datetime field in this trust plane is
//! already formatted into its canonical string form (see
//! [`crate::temporal::Timestamp::to_canonical_string`]) before it is ever
//! handed to a signer, so there is nothing left for this layer to coerce.
//!
//! ## Security Invariant
//!
//! The inner `Vec<u8>` is private. The only way to construct `CanonicalBytes`
//! is through [`CanonicalBytes::new()`] or [`CanonicalBytes::from_value()`].
//! This makes "a signer used a different serializer than the verifier"
//! structurally impossible from within this crate.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// Bytes produced exclusively by RFC 8785 canonicalization.
///
/// The inner `Vec<u8>` is private — downstream code cannot construct
/// `CanonicalBytes` except through [`CanonicalBytes::new()`]. This single
/// construction path ensures every digest in the system is computed from
/// properly canonicalized data.
///
/// # Security Invariant
///
/// Only `CanonicalBytes::new()` can create this type. The private inner field
/// makes "wrong serialization path" defects structurally impossible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Construct canonical bytes from any serializable value.
    ///
    /// This is the **ONLY** way to construct `CanonicalBytes` from a typed
    /// value. Every signature and MAC in the trust plane must flow through
    /// this constructor or [`CanonicalBytes::from_value`].
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError::SerializationFailed`] if the value
    /// cannot be serialized (e.g. a map with non-string keys, or a `NaN`/
    /// infinite float).
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let bytes = serde_json_canonicalizer::to_vec(obj)
            .map_err(|e| CanonicalizationError::SerializationFailed(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Construct canonical bytes from a pre-existing `serde_json::Value`.
    ///
    /// Useful when you already hold a `Value` and want to avoid a redundant
    /// serde round-trip.
    pub fn from_value(value: Value) -> Result<Self, CanonicalizationError> {
        let bytes = serde_json_canonicalizer::to_vec(&value)
            .map_err(|e| CanonicalizationError::SerializationFailed(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Wrap bytes that were already produced by a signer and are being
    /// re-verified exactly as transmitted — never re-serialized through
    /// this crate's own coercion pipeline.
    ///
    /// Every wire payload this trust plane signs (`cml_payload`,
    /// `license_payload`, `manifest_payload`, the `LicenseFile` body) is
    /// carried end-to-end as an opaque blob: the signer canonicalizes
    /// once via [`Self::new`]/[`Self::from_value`], and every downstream
    /// verifier checks the signature against the identical bytes it
    /// received, rather than re-parsing into a struct and re-serializing
    /// (which could silently diverge from the signer's serializer).
    /// This constructor is that second path — it performs no
    /// coercion, so it must never be used to build bytes this process
    /// intends to sign itself.
    pub fn from_raw_trusted(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Access the canonical bytes for digest computation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume and return the inner byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Return the length of the canonical byte representation.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return whether the canonical byte representation is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_sorts_keys() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn canonical_nested_key_sorting() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": 1});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"{"a":1,"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn canonical_serializes_float_deterministically() {
        let value = json!({"amount": 3.15});
        let a = CanonicalBytes::new(&value).unwrap();
        let b = CanonicalBytes::new(&value).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_accepts_integers() {
        let value = json!({"count": 42, "negative": -7, "zero": 0});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"{"count":42,"negative":-7,"zero":0}"#);
    }

    #[test]
    fn canonical_preserves_already_formatted_timestamp_strings() {
        // Every Timestamp field in this trust plane is already rendered via
        // `Timestamp::to_canonical_string` before it reaches a signer, so
        // this layer passes the string through unchanged.
        let value = json!({"ts": "2026-01-15T12:00:00Z"});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"{"ts":"2026-01-15T12:00:00Z"}"#);
    }

    #[test]
    fn canonical_preserves_non_datetime_strings() {
        let value = json!({"name": "hello world", "id": "abc-123"});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"{"id":"abc-123","name":"hello world"}"#);
    }

    #[test]
    fn canonical_handles_empty_structures() {
        let empty_obj = json!({});
        let empty_arr = json!([]);
        assert_eq!(
            std::str::from_utf8(CanonicalBytes::new(&empty_obj).unwrap().as_bytes()).unwrap(),
            "{}"
        );
        assert_eq!(
            std::str::from_utf8(CanonicalBytes::new(&empty_arr).unwrap().as_bytes()).unwrap(),
            "[]"
        );
    }

    #[test]
    fn canonical_null_bool() {
        let value = json!({"flag": true, "nothing": null, "off": false});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"{"flag":true,"nothing":null,"off":false}"#);
    }

    #[test]
    fn canonical_is_deterministic() {
        let value = json!({"b": [3, 2, 1], "a": {"y": "hello", "x": 42}});
        let a = CanonicalBytes::new(&value).unwrap();
        let b = CanonicalBytes::new(&value).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn from_value_matches_new() {
        let value = json!({"key": "value", "n": 42});
        let from_new = CanonicalBytes::new(&value).unwrap();
        let from_value = CanonicalBytes::from_value(value).unwrap();
        assert_eq!(from_new, from_value);
    }

    #[test]
    fn canonical_len_and_is_empty() {
        let value = json!({});
        let cb = CanonicalBytes::new(&value).unwrap();
        assert_eq!(cb.len(), 2); // "{}"
        assert!(!cb.is_empty());
    }

    #[test]
    fn canonical_into_bytes() {
        let value = json!({"key": "val"});
        let cb = CanonicalBytes::new(&value).unwrap();
        let expected = cb.as_bytes().to_vec();
        let bytes = cb.into_bytes();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn canonical_as_ref() {
        let value = json!({"x": 1});
        let cb = CanonicalBytes::new(&value).unwrap();
        let as_ref_bytes: &[u8] = cb.as_ref();
        assert_eq!(as_ref_bytes, cb.as_bytes());
    }

    #[test]
    fn canonical_bool_and_null_passthrough() {
        let value_true = json!(true);
        let cb = CanonicalBytes::new(&value_true).unwrap();
        assert_eq!(std::str::from_utf8(cb.as_bytes()).unwrap(), "true");

        let value_null = json!(null);
        let cb = CanonicalBytes::new(&value_null).unwrap();
        assert_eq!(std::str::from_utf8(cb.as_bytes()).unwrap(), "null");
    }

    #[test]
    fn canonical_clone_and_eq() {
        let value = json!({"a": 1});
        let cb = CanonicalBytes::new(&value).unwrap();
        let cb2 = cb.clone();
        assert_eq!(cb, cb2);
    }

    #[test]
    fn canonical_hash_works() {
        use std::collections::HashSet;
        let cb1 = CanonicalBytes::new(&json!({"a": 1})).unwrap();
        let cb2 = CanonicalBytes::new(&json!({"a": 2})).unwrap();
        let mut set = HashSet::new();
        set.insert(cb1.clone());
        set.insert(cb2);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&cb1));
    }

    #[test]
    fn canonical_array_with_nested_values() {
        let value = json!([{"b": 2, "a": 1}, null, true, "hello"]);
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"[{"a":1,"b":2},null,true,"hello"]"#);
    }

    // ── Coverage expansion tests (agent-added unique tests) ─────────

    #[test]
    fn canonical_debug_format() {
        let cb = CanonicalBytes::new(&json!({"test": true})).unwrap();
        let debug_str = format!("{cb:?}");
        assert!(debug_str.contains("CanonicalBytes"));
    }

    #[test]
    fn canonical_deeply_nested_object() {
        let value = json!({"a": {"b": {"c": {"d": 42}}}});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(s, r#"{"a":{"b":{"c":{"d":42}}}}"#);
    }

    #[test]
    fn canonical_string_with_special_chars() {
        let value = json!({"msg": "hello \"world\"\nnewline"});
        let cb = CanonicalBytes::new(&value).unwrap();
        let s = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert!(s.contains("hello"));
    }

    #[test]
    fn canonical_integer_zero() {
        let value = json!(0);
        let cb = CanonicalBytes::new(&value).unwrap();
        assert_eq!(std::str::from_utf8(cb.as_bytes()).unwrap(), "0");
    }

    #[test]
    fn canonical_negative_integer() {
        let value = json!(-42);
        let cb = CanonicalBytes::new(&value).unwrap();
        assert_eq!(std::str::from_utf8(cb.as_bytes()).unwrap(), "-42");
    }

    /// CRITICAL: Verify serde_json::Map iterates keys in sorted order.
    ///
    /// If preserve_order is enabled, Map uses IndexMap (insertion order)
    /// instead of BTreeMap (sorted order), silently corrupting every
    /// content-addressed digest in the system.
    ///
    /// If this test fails, run: cargo tree -e features -i serde_json
    #[test]
    fn serde_json_map_must_use_sorted_order() {
        let mut map = serde_json::Map::new();
        map.insert("z".to_string(), serde_json::Value::Null);
        map.insert("m".to_string(), serde_json::Value::Null);
        map.insert("a".to_string(), serde_json::Value::Null);
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(
            keys,
            vec!["a", "m", "z"],
            "CRITICAL: serde_json preserve_order is active — Map uses IndexMap not BTreeMap. \
             This corrupts ALL digests. Run: cargo tree -e features -i serde_json"
        );
    }

    /// End-to-end: canonical output has sorted keys from unsorted input.
    #[test]
    fn canonical_output_sorted_keys_from_reverse_input() {
        let input = r#"{"zebra":1,"apple":2,"mango":3}"#;
        let value: serde_json::Value = serde_json::from_str(input).unwrap();
        let cb = CanonicalBytes::new(&value).unwrap();
        let output = std::str::from_utf8(cb.as_bytes()).unwrap();
        assert_eq!(
            output, r#"{"apple":2,"mango":3,"zebra":1}"#,
            "Canonical output keys not sorted — preserve_order may be active"
        );
    }
}

/// Property-based tests using proptest.
///
/// These tests verify structural properties of canonicalization that must hold
/// for ALL valid inputs, not just specific test vectors.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Strategy to generate arbitrary JSON values WITHOUT floats.
    ///
    /// Floats are exercised separately in [`canonical_handles_finite_floats`];
    /// excluding them here keeps round-trip comparisons exact (float
    /// reparsing is not guaranteed bit-identical across `serde_json` paths).
    fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            // Use i64 range that fits in serde_json::Number
            (-1_000_000_000i64..1_000_000_000i64)
                .prop_map(|n| Value::Number(serde_json::Number::from(n))),
            "[a-zA-Z0-9 _-]{0,30}".prop_map(Value::String),
        ];
        leaf.prop_recursive(
            3,  // max depth
            64, // max nodes
            10, // items per collection
            |inner| {
                prop_oneof![
                    // Arrays
                    prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                    // Objects with string keys
                    prop::collection::btree_map("[a-z_]{1,8}", inner, 0..5)
                        .prop_map(|m| { Value::Object(m.into_iter().collect()) }),
                ]
            },
        )
    }

    proptest! {
        /// Canonicalization is deterministic: same input always produces same bytes.
        #[test]
        fn canonical_is_deterministic(value in arb_json_value()) {
            let a = CanonicalBytes::new(&value).unwrap();
            let b = CanonicalBytes::new(&value).unwrap();
            prop_assert_eq!(a.as_bytes(), b.as_bytes());
        }

        /// Canonicalization is idempotent: canonicalizing already-canonical data
        /// produces identical bytes.
        #[test]
        fn canonical_is_idempotent(value in arb_json_value()) {
            let first = CanonicalBytes::new(&value).unwrap();
            // Parse the canonical bytes back to a Value and re-canonicalize.
            let reparsed: Value = serde_json::from_slice(first.as_bytes()).unwrap();
            let second = CanonicalBytes::new(&reparsed).unwrap();
            prop_assert_eq!(first.as_bytes(), second.as_bytes());
        }

        /// Object keys in canonical output are always lexicographically sorted.
        #[test]
        fn canonical_keys_are_sorted(
            keys in prop::collection::btree_set("[a-z]{1,8}", 1..10),
            val in -100i64..100i64,
        ) {
            let obj: serde_json::Map<String, Value> = keys
                .iter()
                .map(|k| (k.clone(), Value::Number(serde_json::Number::from(val))))
                .collect();
            let value = Value::Object(obj);
            let cb = CanonicalBytes::new(&value).unwrap();
            let reparsed: serde_json::Map<String, Value> =
                serde_json::from_slice(cb.as_bytes()).unwrap();
            let result_keys: Vec<&String> = reparsed.keys().collect();
            let mut sorted_keys = result_keys.clone();
            sorted_keys.sort();
            prop_assert_eq!(result_keys, sorted_keys);
        }

        /// Finite non-integer floats canonicalize deterministically rather
        /// than being rejected.
        #[test]
        fn canonical_handles_finite_floats(
            f in prop::num::f64::ANY.prop_filter("non-integer finite float",
                |f| f.is_finite() && f.fract() != 0.0)
        ) {
            if let Some(n) = serde_json::Number::from_f64(f) {
                let value = Value::Object(
                    std::iter::once(("x".to_string(), Value::Number(n))).collect()
                );
                let a = CanonicalBytes::from_value(value.clone()).unwrap();
                let b = CanonicalBytes::from_value(value).unwrap();
                prop_assert_eq!(a.as_bytes(), b.as_bytes());
            }
        }

        /// Canonical bytes are valid UTF-8.
        #[test]
        fn canonical_bytes_are_valid_utf8(value in arb_json_value()) {
            let cb = CanonicalBytes::new(&value).unwrap();
            prop_assert!(std::str::from_utf8(cb.as_bytes()).is_ok());
        }

        /// Canonical bytes parse back to logically equivalent JSON.
        #[test]
        fn canonical_roundtrip_preserves_data(value in arb_json_value()) {
            let cb = CanonicalBytes::new(&value).unwrap();
            let reparsed: Value = serde_json::from_slice(cb.as_bytes()).unwrap();
            // Re-canonicalize both and compare bytes (not Value equality,
            // because insertion order may differ).
            let cb2 = CanonicalBytes::new(&reparsed).unwrap();
            prop_assert_eq!(cb.as_bytes(), cb2.as_bytes());
        }
    }
}
