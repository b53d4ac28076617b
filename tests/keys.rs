use dataset_managed::keys;
use dataset_managed::meta::{FilterOptionMeta, LocationOptionMeta, TimePeriodMeta};
use proptest::prelude::*;

fn location_option(label: &str, code: Option<&str>, urn: Option<&str>) -> LocationOptionMeta {
    LocationOptionMeta {
        id: 1,
        public_id: None,
        label: label.to_string(),
        code: code.map(|c| c.to_string()),
        old_code: None,
        urn: urn.map(|u| u.to_string()),
        ukprn: None,
    }
}

#[test]
fn identical_fields_produce_identical_keys() {
    let a = location_option("Sheffield", Some("E100"), None);
    let b = location_option("Sheffield", Some("E100"), None);
    assert_eq!(keys::location_option_key(&a), keys::location_option_key(&b));
}

#[test]
fn internal_ids_do_not_affect_keys() {
    let a = location_option("Sheffield", Some("E100"), None);
    let mut b = location_option("Sheffield", Some("E100"), None);
    b.id = 999;
    b.public_id = Some("abcd".to_string());
    assert_eq!(keys::location_option_key(&a), keys::location_option_key(&b));
}

#[test]
fn any_differing_code_changes_the_key() {
    let base = location_option("Sheffield", Some("E100"), None);
    let other_code = location_option("Sheffield", Some("E200"), None);
    let other_urn = location_option("Sheffield", Some("E100"), Some("140000"));
    assert_ne!(
        keys::location_option_key(&base),
        keys::location_option_key(&other_code)
    );
    assert_ne!(
        keys::location_option_key(&base),
        keys::location_option_key(&other_urn)
    );
}

#[test]
fn code_fields_are_positional() {
    // The same value in a different code slot is a different entity.
    let in_code = location_option("Sheffield", Some("140000"), None);
    let in_urn = location_option("Sheffield", None, Some("140000"));
    assert_ne!(
        keys::location_option_key(&in_code),
        keys::location_option_key(&in_urn)
    );
}

#[test]
fn filter_option_keys_trim_whitespace() {
    let padded = FilterOptionMeta {
        id: 1,
        public_id: None,
        label: "  Total ".to_string(),
    };
    let plain = FilterOptionMeta {
        id: 2,
        public_id: None,
        label: "Total".to_string(),
    };
    assert_eq!(
        keys::filter_option_key(&padded),
        keys::filter_option_key(&plain)
    );
}

#[test]
fn time_period_keys_separate_code_and_period() {
    let a = TimePeriodMeta {
        id: 1,
        public_id: None,
        code: "AY".to_string(),
        period: "2024/25".to_string(),
    };
    let b = TimePeriodMeta {
        id: 2,
        public_id: None,
        code: "CY".to_string(),
        period: "2024/25".to_string(),
    };
    assert_ne!(keys::time_period_key(&a), keys::time_period_key(&b));
}

proptest! {
    #[test]
    fn key_generation_is_deterministic(
        label in "[a-zA-Z0-9 ]{1,30}",
        code in proptest::option::of("[A-Z0-9]{1,10}"),
        urn in proptest::option::of("[0-9]{1,8}"),
    ) {
        let a = location_option(&label, code.as_deref(), urn.as_deref());
        let b = location_option(&label, code.as_deref(), urn.as_deref());
        prop_assert_eq!(keys::location_option_key(&a), keys::location_option_key(&b));
    }

    #[test]
    fn distinct_labels_never_collide(
        label_a in "[a-zA-Z0-9]{1,30}",
        label_b in "[a-zA-Z0-9]{1,30}",
    ) {
        prop_assume!(label_a != label_b);
        let a = location_option(&label_a, Some("E100"), None);
        let b = location_option(&label_b, Some("E100"), None);
        prop_assert_ne!(keys::location_option_key(&a), keys::location_option_key(&b));
    }
}
