//! Credential pool loading and rotation

use repo_miner::credentials::{CredentialError, Rotation};
use repo_miner::CredentialPool;

#[test]
fn test_rotating_n_times_returns_to_start() {
    for n in 1..=6usize {
        let raw: Vec<String> = (0..n).map(|i| format!("token-{i}")).collect();
        let joined = raw.join(",");
        let mut pool = CredentialPool::load(Some(joined.as_str()), None, false).unwrap();
        assert_eq!(pool.len(), n);

        let start = pool.active_index();
        let mut seen = Vec::new();
        for _ in 0..n {
            pool.rotate();
            seen.push(pool.active_index());
        }
        assert_eq!(pool.active_index(), start, "pool of {n}");
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), n);
    }
}

#[test]
fn test_single_credential_rotation_is_noop() {
    let mut pool = CredentialPool::load(Some("only"), None, false).unwrap();
    for _ in 0..3 {
        assert_eq!(pool.rotate(), Rotation::NoAlternative);
        assert_eq!(pool.current().secret(), "only");
    }
}

#[test]
fn test_rotation_reports_indices() {
    let mut pool = CredentialPool::load(Some("a, b ,c"), None, false).unwrap();
    assert_eq!(pool.rotate(), Rotation::Switched { from: 0, to: 1 });
    assert_eq!(pool.current().secret(), "b");
    assert_eq!(pool.rotate(), Rotation::Switched { from: 1, to: 2 });
    assert_eq!(pool.rotate(), Rotation::Switched { from: 2, to: 0 });
}

#[test]
fn test_empty_or_missing_identity_is_configuration_error() {
    for raw in [None, Some(""), Some(" , ,")] {
        assert!(matches!(
            CredentialPool::load(raw, None, false),
            Err(CredentialError::Configuration(_))
        ));
    }

    assert!(matches!(
        CredentialPool::load(Some("jira-token"), None, true),
        Err(CredentialError::Configuration(_))
    ));
    let pool = CredentialPool::load(Some("jira-token"), Some("dev@example.com"), true).unwrap();
    assert_eq!(pool.current().identity(), Some("dev@example.com"));
}

#[test]
fn test_masked_credential_hides_secret() {
    let pool = CredentialPool::load(Some("ghp_abcdefghijklmnop"), None, false).unwrap();
    let masked = pool.current().masked();
    assert!(!masked.contains("ghp_abcdefghijkl"));
    assert!(masked.ends_with("mnop"));
}
