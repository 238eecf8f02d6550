//! Canonical text rendering of key/value maps for stable hashing.

/// Renders key/value pairs as one `key=value` line each.
///
/// Every line, including the last, is terminated by `\n`. The caller must
/// supply pairs in a stable order (iterate a `BTreeMap`); this function
/// preserves the order it is given. The output feeds digest computation,
/// so the format must never change.
pub fn canonical_map_text<K, V, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(key.as_ref());
        out.push('=');
        out.push_str(value.as_ref());
        out.push('\n');
    }
    out
}
