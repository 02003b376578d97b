use gatehouse_routing::{
    parse_hostname_pattern, parse_path_pattern, HostRouter, KeyFormat, PathRouter, RouteError,
    RouteKey, RouteTree,
};

fn key(segments: &[&str], wildcard: bool) -> RouteKey {
    RouteKey::new(segments.iter().copied(), wildcard)
}

#[test]
fn test_most_specific_ordering() {
    let mut tree = RouteTree::new();
    tree.add(RouteKey::full_wildcard(), "any").unwrap();
    tree.add(key(&["com"], true), "com/*").unwrap();
    tree.add(key(&["com", "example"], true), "example/*").unwrap();
    tree.add(key(&["com", "example"], false), "example").unwrap();
    tree.add(key(&["com", "example", "www"], false), "www").unwrap();

    let order: Vec<_> = tree
        .find_most_specific(&key(&["com", "example"], false))
        .map(|m| *m.value)
        .collect();
    assert_eq!(order, vec!["example", "example/*", "com/*", "any"]);

    let order: Vec<_> = tree
        .find_most_specific(&key(&["com", "example", "api"], false))
        .map(|m| *m.value)
        .collect();
    assert_eq!(order, vec!["example/*", "com/*", "any"]);
}

#[test]
fn test_match_sequence_is_restartable() {
    let mut tree = RouteTree::new();
    tree.add(key(&["a"], true), 1).unwrap();
    tree.add(RouteKey::full_wildcard(), 0).unwrap();

    let candidate = key(&["a", "b"], false);
    let matches = tree.find_most_specific(&candidate);
    let first: Vec<_> = matches.clone().map(|m| *m.value).collect();
    let second: Vec<_> = matches.map(|m| *m.value).collect();
    assert_eq!(first, second);

    let again: Vec<_> = tree.find_most_specific(&candidate).map(|m| *m.value).collect();
    assert_eq!(first, again);
}

#[test]
fn test_wildcard_remainder() {
    let mut tree = RouteTree::new();
    tree.add(key(&["files"], true), ()).unwrap();

    let found = tree
        .find_most_specific(&key(&["files", "a", "b"], false))
        .next()
        .unwrap();
    assert_eq!(found.matched_len, 1);
    assert_eq!(found.remainder.segments(), ["a", "b"]);
}

#[test]
fn test_duplicate_add_keeps_first_binding() {
    let mut tree = RouteTree::new();
    tree.add(key(&["x"], false), "first").unwrap();

    let err = tree.add(key(&["x"], false), "second").unwrap_err();
    assert!(matches!(err, RouteError::DuplicateBinding { .. }));
    assert_eq!(tree.find_exact(&key(&["x"], false)), Some(&"first"));
    assert_eq!(tree.len(), 1);

    // Same segments with the other flag occupy a separate slot.
    tree.add(key(&["x"], true), "wild").unwrap();
    assert_eq!(tree.len(), 2);
}

#[test]
fn test_subtree() {
    let mut tree = RouteTree::new();
    tree.add(key(&["a"], false), 1).unwrap();
    tree.add(key(&["a", "b"], false), 2).unwrap();
    tree.add(key(&["a", "b"], true), 3).unwrap();
    tree.add(key(&["c"], false), 4).unwrap();

    let sub = tree.find_subtree(&key(&["a"], true));
    let values: Vec<_> = sub.values().copied().collect();
    assert_eq!(values.len(), 3);
    assert!(!values.contains(&4));

    assert_eq!(tree.find_subtree(&RouteKey::full_wildcard()).len(), 4);
    assert!(tree.find_subtree(&key(&["zzz"], true)).is_empty());
}

#[test]
fn test_hostname_format_round_trip() {
    for pattern in ["*", "*.example.com", "www.example.com", "localhost"] {
        let parsed = parse_hostname_pattern(pattern, true).unwrap();
        assert_eq!(parsed.format_with(&KeyFormat::HOSTNAME), pattern);
    }
    let quoted = parse_hostname_pattern("*.example.com", true)
        .unwrap()
        .format_with(&KeyFormat::HOSTNAME.quoted());
    assert_eq!(quoted, "\"*.example.com\"");
}

#[test]
fn test_path_format_round_trip() {
    for pattern in ["/", "/*", "/a", "/a/", "/a/*", "/a/b/c.html"] {
        let parsed = parse_path_pattern(pattern, true).unwrap();
        assert_eq!(parsed.format_with(&KeyFormat::PATH), pattern);
    }
}

#[test]
fn test_virtual_hosts_with_mounts() {
    let mut site = PathRouter::new();
    site.bind("/", "index").unwrap();
    site.bind("/files/", "listing").unwrap();
    site.bind("/files/*", "files").unwrap();
    site.bind("/*", "fallback").unwrap();

    let mut hosts = HostRouter::new();
    hosts.bind("www.example.com", site).unwrap();

    let site = hosts.resolve("WWW.example.com").unwrap();

    let order: Vec<_> = site.dispatch("/").map(|m| *m.value).collect();
    assert_eq!(order, vec!["index", "fallback"]);

    let order: Vec<_> = site.dispatch("/files/").map(|m| *m.value).collect();
    assert_eq!(order, vec!["listing", "files", "fallback"]);

    let first = site.dispatch("/files/docs/readme.txt?download=1").next().unwrap();
    assert_eq!(*first.value, "files");
    assert_eq!(first.pattern(), "/files/*");
    assert_eq!(first.base_path(), "/files");
    assert_eq!(first.remainder_path(), "/docs/readme.txt");

    let order: Vec<_> = site.dispatch("/other").map(|m| *m.value).collect();
    assert_eq!(order, vec!["fallback"]);

    assert!(hosts.resolve("example.com").is_none());
}

#[test]
fn test_certificate_subset_per_listener() {
    let mut certs = HostRouter::new();
    certs.bind("*.example.com", "wildcard-cert").unwrap();
    certs.bind("shop.example.com", "shop-cert").unwrap();
    certs.bind("example.org", "org-cert").unwrap();

    let listener = certs.subset(&["*.example.com"]).unwrap();
    assert_eq!(listener.len(), 2);
    assert_eq!(listener.resolve("shop.example.com"), Some(&"shop-cert"));
    assert_eq!(listener.resolve("api.example.com"), Some(&"wildcard-cert"));
    assert_eq!(listener.resolve("example.org"), None);

    assert!(matches!(
        certs.subset(&["example.net"]),
        Err(RouteError::NoMatch { .. })
    ));
}
