//! DNS-label name normalization
//!
//! Every name that ends up on a cluster object (workflow, stage, step,
//! secret) is normalized to RFC 1123 label form before it is used anywhere
//! else, so the rest of the engine never has to re-check it.

/// Maximum length of a Kubernetes object name segment.
pub const MAX_NAME_LEN: usize = 63;

/// Normalize a raw name to DNS-label form.
///
/// Lowercases the input, replaces every character outside `[a-z0-9-]` with
/// `-`, collapses runs of `-`, strips leading/trailing `-` and truncates to
/// 63 characters. The function is idempotent.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true; // suppress a leading dash
    for ch in raw.trim().chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(MAX_NAME_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Check that a string already is a valid DNS label.
pub fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Build the workload object name for a step: `<workflow>-<stage>-<step>`.
///
/// Names longer than 63 characters are truncated and suffixed with a stable
/// hash of the full name so they stay unique and deterministic across runs.
pub fn workload_name(workflow: &str, stage: &str, step: &str) -> String {
    let full = format!("{workflow}-{stage}-{step}");
    if full.len() <= MAX_NAME_LEN {
        return full;
    }
    let digest = fnv1a(full.as_bytes());
    let mut truncated = full[..MAX_NAME_LEN - 8].to_string();
    while truncated.ends_with('-') {
        truncated.pop();
    }
    format!("{truncated}-{:07x}", digest & 0xfff_ffff)
}

// 64-bit FNV-1a; stable across platforms and releases, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("Train Model"), "train-model");
        assert_eq!(normalize("step_one.v2"), "step-one-v2");
        assert_eq!(normalize("  --weird--  "), "weird");
        assert_eq!(normalize("already-fine"), "already-fine");
    }

    #[test]
    fn test_normalize_collapses_runs() {
        assert_eq!(normalize("a___b...c"), "a-b-c");
    }

    #[test]
    fn test_normalize_truncates() {
        let long = "x".repeat(100);
        assert!(normalize(&long).len() <= MAX_NAME_LEN);
    }

    #[test]
    fn test_is_dns_label() {
        assert!(is_dns_label("train-model"));
        assert!(is_dns_label("a1"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-leading"));
        assert!(!is_dns_label("trailing-"));
        assert!(!is_dns_label("UPPER"));
    }

    #[test]
    fn test_workload_name_short() {
        assert_eq!(workload_name("wf", "train", "sarimax"), "wf-train-sarimax");
    }

    #[test]
    fn test_workload_name_long_is_stable_and_bounded() {
        let wf = "a".repeat(40);
        let first = workload_name(&wf, &"b".repeat(30), "step");
        let second = workload_name(&wf, &"b".repeat(30), "step");
        assert_eq!(first, second);
        assert!(first.len() <= MAX_NAME_LEN);
        assert!(is_dns_label(&first));
    }

    #[test]
    fn test_workload_name_long_distinguishes_steps() {
        let wf = "a".repeat(40);
        let stage = "b".repeat(30);
        assert_ne!(workload_name(&wf, &stage, "one"), workload_name(&wf, &stage, "two"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Normalization is idempotent: normalize(normalize(n)) == normalize(n).
        #[test]
        fn normalize_idempotent(raw in "\\PC{0,80}") {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once.clone());
        }

        /// Every non-empty result is a valid DNS label.
        #[test]
        fn normalize_yields_dns_labels(raw in "\\PC{0,80}") {
            let out = normalize(&raw);
            if !out.is_empty() {
                prop_assert!(is_dns_label(&out));
            }
        }
    }
}
