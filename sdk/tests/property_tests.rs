use proptest::prelude::*;
use sdk::errors::{ErrorExt, ManifestError};
use sdk::{
    Capability, CapabilitySet, ContentChecksum, MenuAction, MenuEntry, MenuItem,
    PluginDescriptor, TrustEvidence, Version, VersionRange,
};

fn arb_version() -> impl Strategy<Value = Version> {
    (0u64..50, 0u64..50, 0u64..50).prop_map(|(a, b, c)| Version::new(a, b, c))
}

fn arb_range() -> impl Strategy<Value = VersionRange> {
    (arb_version(), proptest::option::of(0u64..20)).prop_map(|(min, bump)| {
        let max = bump.map(|b| Version::new(min.major + b, min.minor, min.patch));
        VersionRange::new(min, max)
    })
}

fn arb_capabilities() -> impl Strategy<Value = CapabilitySet> {
    proptest::sample::subsequence(Capability::ALL.to_vec(), 0..=Capability::ALL.len())
        .prop_map(|caps| caps.into_iter().collect())
}

fn arb_trust() -> impl Strategy<Value = TrustEvidence> {
    (
        proptest::option::of("[A-Za-z][A-Za-z ]{0,20}"),
        proptest::option::of("[A-Z0-9]{10}"),
        proptest::option::of(any::<[u8; 32]>()),
    )
        .prop_map(|(identity, team, digest)| TrustEvidence {
            signing_identity: identity,
            team_identifier: team,
            checksum: digest.map(ContentChecksum::from_bytes),
        })
}

fn arb_menu() -> impl Strategy<Value = Vec<MenuEntry>> {
    (0usize..3, 0usize..3).prop_map(|(actions, nested)| {
        let mut menu: Vec<MenuEntry> = (0..actions)
            .map(|i| {
                MenuEntry::Action(MenuAction {
                    id: format!("action-{i}"),
                    title: format!("Action {i}"),
                    shortcut: (i % 2 == 0).then(|| format!("Ctrl+{i}")),
                })
            })
            .collect();
        if nested > 0 {
            menu.push(MenuEntry::Separator);
            menu.push(MenuEntry::Submenu {
                title: "More".to_string(),
                items: (0..nested)
                    .map(|i| {
                        MenuItem::Action(MenuAction {
                            id: format!("nested-{i}"),
                            title: format!("Nested {i}"),
                            shortcut: None,
                        })
                    })
                    .chain(std::iter::once(MenuItem::Separator))
                    .collect(),
            });
        }
        menu
    })
}

prop_compose! {
    fn arb_descriptor()(
        id in "[a-z][a-z0-9.-]{0,30}",
        name in "[A-Za-z][A-Za-z0-9 ]{0,20}",
        version in arb_version(),
        author in "[A-Za-z ]{1,20}",
        description in "\\PC{0,40}",
        artifact in "lib[a-z]{1,10}\\.so",
        mut capabilities in arb_capabilities(),
        host in arb_range(),
        entitlements in proptest::collection::vec("[a-z.-]{1,20}", 0..3),
        trust in arb_trust(),
        menu in arb_menu(),
    ) -> PluginDescriptor {
        if !menu.is_empty() {
            capabilities = capabilities
                .iter()
                .chain(std::iter::once(Capability::UiContribution))
                .collect();
        }
        PluginDescriptor {
            id,
            name,
            version,
            author,
            description,
            artifact,
            capabilities,
            host,
            entitlements,
            trust,
            menu,
        }
    }
}

// Descriptors survive a trip through the manifest format
proptest! {
    #[test]
    fn test_descriptor_roundtrip(descriptor in arb_descriptor()) {
        let manifest = descriptor.to_manifest().unwrap();
        let reparsed = PluginDescriptor::parse(manifest.as_bytes()).unwrap();
        prop_assert_eq!(descriptor, reparsed);
    }
}

// Parsing arbitrary input never panics and failures carry a hint
proptest! {
    #[test]
    fn test_parse_is_total(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        if let Err(err) = PluginDescriptor::parse(&bytes) {
            prop_assert!(!err.user_hint().is_empty());
            prop_assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_parse_is_total_on_near_valid_toml(
        id in "\\PC{0,12}",
        version in "\\PC{0,8}",
        capability in "\\PC{0,20}",
        min in "\\PC{0,8}",
    ) {
        let text = format!(
            "[plugin]\nid = {id:?}\nname = \"n\"\nversion = {version:?}\nauthor = \"a\"\n\
             artifact = \"lib.so\"\ncapabilities = [{capability:?}]\n\n[host]\nmin = {min:?}\n"
        );
        let _ = PluginDescriptor::parse(text.as_bytes());
    }
}

proptest! {
    #[test]
    fn test_unknown_capability_never_dropped(token in "[a-z]{3,12}-[a-z]{3,12}") {
        prop_assume!(token.parse::<Capability>().is_err());
        let text = format!(
            "[plugin]\nid = \"p\"\nname = \"n\"\nversion = \"1.0.0\"\nauthor = \"a\"\n\
             artifact = \"lib.so\"\ncapabilities = [\"document-processing\", {token:?}]\n\n\
             [host]\nmin = \"1.0.0\"\n"
        );
        prop_assert_eq!(
            PluginDescriptor::parse(text.as_bytes()),
            Err(ManifestError::UnknownCapability(token))
        );
    }
}
