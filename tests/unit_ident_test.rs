use signalsd::core::ident::{
    BumpType, SKIP_VALIDATION_URL, SemVer, derive_slug, normalize_email, signal_type_path,
    validate_readme_url, validate_schema_url,
};

#[test]
fn test_slug_derivation_maps_non_alphanumerics_to_dashes() {
    assert_eq!(derive_slug("Sample ISN @example.org"), "sample-isn--example-org");
    assert_eq!(derive_slug("Sample Signal"), "sample-signal");
    assert_eq!(derive_slug("  padded  "), "padded");
    assert_eq!(derive_slug("MiXeD CaSe 42"), "mixed-case-42");
}

#[test]
fn test_slug_derivation_trims_edge_dashes() {
    assert_eq!(derive_slug("!!hello!!"), "hello");
    assert_eq!(derive_slug("***"), "");
}

#[test]
fn test_sem_ver_parses_with_optional_v_prefix() {
    let plain: SemVer = "1.2.3".parse().unwrap();
    let prefixed: SemVer = "v1.2.3".parse().unwrap();
    assert_eq!(plain, prefixed);
    assert_eq!(plain.to_string(), "1.2.3");
}

#[test]
fn test_sem_ver_rejects_garbage() {
    assert!("".parse::<SemVer>().is_err());
    assert!("1.2".parse::<SemVer>().is_err());
    assert!("a.b.c".parse::<SemVer>().is_err());
    assert!("1.2.3.4".parse::<SemVer>().is_err());
}

#[test]
fn test_sem_ver_ordering_is_numeric() {
    let small: SemVer = "0.9.9".parse().unwrap();
    let large: SemVer = "0.10.0".parse().unwrap();
    assert!(small < large);
}

#[test]
fn test_bump_resets_lower_components() {
    let base = SemVer::new(1, 2, 3);
    assert_eq!(base.bump(BumpType::Patch), SemVer::new(1, 2, 4));
    assert_eq!(base.bump(BumpType::Minor), SemVer::new(1, 3, 0));
    assert_eq!(base.bump(BumpType::Major), SemVer::new(2, 0, 0));
}

#[test]
fn test_first_version_from_zero() {
    assert_eq!(SemVer::ZERO.bump(BumpType::Patch).to_string(), "0.0.1");
    assert_eq!(SemVer::ZERO.bump(BumpType::Minor).to_string(), "0.1.0");
    assert_eq!(SemVer::ZERO.bump(BumpType::Major).to_string(), "1.0.0");
}

#[test]
fn test_signal_type_path_format() {
    let sem_ver: SemVer = "0.0.1".parse().unwrap();
    assert_eq!(signal_type_path("sample-signal", sem_ver), "sample-signal/v0.0.1");
}

#[test]
fn test_schema_url_allow_list() {
    assert!(validate_schema_url(SKIP_VALIDATION_URL).is_ok());
    assert!(validate_schema_url("https://github.com/org/repo/blob/v1.0.0/schema.json").is_ok());
    assert!(
        validate_schema_url("https://github.com/org/repo/blob/main/nested/dir/s.json").is_ok()
    );

    assert!(validate_schema_url("https://github.com/org/repo/main/schema.json").is_err());
    assert!(validate_schema_url("https://gitlab.com/org/repo/blob/main/schema.json").is_err());
    assert!(validate_schema_url("http://github.com/org/repo/blob/main/schema.json").is_err());
    assert!(validate_schema_url("https://github.com/org/repo/blob/main/schema.yaml").is_err());
}

#[test]
fn test_readme_url_allow_list() {
    assert!(validate_readme_url("https://github.com/o/r/blob/v1/R.md").is_ok());
    assert!(validate_readme_url("https://github.com/o/r/blob/v1/R.json").is_err());
}

#[test]
fn test_email_normalization() {
    assert_eq!(normalize_email(" A@Example.ORG ").unwrap(), "a@example.org");
    assert!(normalize_email("not-an-email").is_err());
    assert!(normalize_email("@example.org").is_err());
    assert!(normalize_email("a@nodot").is_err());
}
