//! Deterministic naming for child resources.
//!
//! Every external resource keel creates is named (and discovered) from the
//! owning object's name plus a purpose suffix, never from a locally cached
//! identifier. This is what keeps re-runs idempotent.

/// Tag key identifying which object owns an external resource
pub const OWNER_TAG_KEY: &str = "keel.dev/substrate";

/// Join an object name with purpose suffixes: `resource_name("demo", &["etcd", "ca"])`
/// yields `"demo-etcd-ca"`.
pub fn resource_name(name: &str, suffixes: &[&str]) -> String {
    let mut parts = vec![name];
    parts.extend_from_slice(suffixes);
    parts.join("-")
}
