/// Strip the tag and digest from an image reference, keeping the repository.
///
/// Registry ports survive: `localhost:5000/app:1.0` yields `localhost:5000/app`.
pub fn image_repository(reference: &str) -> &str {
    let reference = reference.trim();
    let without_digest = match reference.split_once('@') {
        Some((repo, _)) => repo,
        None => reference,
    };
    let last_slash = without_digest.rfind('/');
    match without_digest.rfind(':') {
        Some(colon) if last_slash.map_or(true, |slash| colon > slash) => &without_digest[..colon],
        _ => without_digest,
    }
}

/// Whether two references name the same repository, ignoring tags and digests.
pub fn same_repository(a: &str, b: &str) -> bool {
    let a = image_repository(a);
    !a.is_empty() && a == image_repository(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tag_and_digest() {
        assert_eq!(image_repository("ghcr.io/ra341/dockman:2"), "ghcr.io/ra341/dockman");
        assert_eq!(image_repository("nginx"), "nginx");
        assert_eq!(image_repository("nginx@sha256:abcdef"), "nginx");
        assert_eq!(
            image_repository("registry/app:1.0@sha256:abcdef"),
            "registry/app"
        );
    }

    #[test]
    fn keeps_registry_port() {
        assert_eq!(image_repository("localhost:5000/app:1.0"), "localhost:5000/app");
        assert_eq!(image_repository("localhost:5000/app"), "localhost:5000/app");
    }

    #[test]
    fn repository_match_ignores_tags_but_not_suffixes() {
        assert!(same_repository("ghcr.io/ra341/dockman:2", "ghcr.io/ra341/dockman"));
        assert!(same_repository("ghcr.io/ra341/dockman@sha256:01", "ghcr.io/ra341/dockman:latest"));
        assert!(!same_repository("ghcr.io/ra341/dockman-agent:2", "ghcr.io/ra341/dockman"));
        assert!(!same_repository("", ""));
    }
}
