use catalogscope_core::{CodecError, EntityKind, IdCodec};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_inverts_encode(fqn in ".*") {
        let id = IdCodec::encode(&fqn);
        prop_assert_eq!(IdCodec::decode(&id).unwrap(), fqn);
    }

    #[test]
    fn encode_is_deterministic(fqn in "[a-z_]{1,12}(\\.[a-z_]{1,12}){0,4}") {
        prop_assert_eq!(IdCodec::encode(&fqn), IdCodec::encode(&fqn));
    }

    #[test]
    fn ids_are_url_safe(fqn in "\\PC*") {
        let id = IdCodec::encode(&fqn);
        prop_assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')));
    }

    #[test]
    fn tampered_payload_is_rejected(fqn in "[a-z]{1,8}\\.[a-z]{1,8}\\.[a-z]{1,8}\\.[a-z]{1,8}") {
        let id = IdCodec::encode(&fqn);
        let (head, checksum) = id.rsplit_once('.').unwrap();
        let flipped: String = checksum
            .chars()
            .map(|c| if c == '0' { '1' } else { '0' })
            .collect();
        let tampered = format!("{head}.{flipped}");
        let is_invalid = matches!(
            IdCodec::decode(&tampered),
            Err(CodecError::InvalidIdentifier { .. })
        );
        prop_assert!(is_invalid);
    }
}

#[test]
fn kind_follows_segment_count() {
    let cases = [
        ("warehouse", EntityKind::Datasource),
        ("warehouse.sales", EntityKind::Database),
        ("warehouse.sales.public", EntityKind::Dataset),
        ("warehouse.sales.public.orders", EntityKind::Table),
        ("warehouse.sales.public.orders.id", EntityKind::Column),
        ("warehouse.\"a.b\".public.orders", EntityKind::Table),
    ];
    for (fqn, kind) in cases {
        let (decoded_kind, decoded) = IdCodec::decode_with_kind(&IdCodec::encode(fqn)).unwrap();
        assert_eq!(decoded_kind, kind, "{fqn}");
        assert_eq!(decoded, fqn);
    }
}

#[test]
fn malformed_ids_are_rejected() {
    for id in ["", "ds-abc123", "tbl-1", "nope", "xyz-AAAA.00000000", "tbl-!!!.deadbeef"] {
        assert!(IdCodec::decode(id).is_err(), "{id:?} should not decode");
    }
}

#[test]
fn wrong_kind_is_rejected() {
    let dataset = IdCodec::encode("warehouse.sales.public");
    assert!(IdCodec::decode_kind(&dataset, EntityKind::Dataset).is_ok());
    assert!(IdCodec::decode_kind(&dataset, EntityKind::Table).is_err());
}
