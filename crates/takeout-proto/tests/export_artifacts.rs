//! End-to-end tests for the artifacts a client receives

use takeout_proto::{
    ArmorType, Dump, DumpFormat, DumpRecord, ExportArchive, MemberNames, Value, armor_decode,
    armor_encode, sanitize_subject, write_archive,
};

fn sample_dump() -> Dump {
    let mut dump = Dump::new();
    dump.push_row(DumpRecord::new(
        "Users",
        vec!["Id".into(), "Username".into(), "Email".into()],
        vec![
            Value::Integer(1),
            Value::Text("alice".into()),
            Value::Text("alice@example.com".into()),
        ],
    ));
    dump.push_row(DumpRecord::new(
        "Items",
        vec!["id".into(), "OwnerId".into(), "name".into(), "note".into()],
        vec![
            Value::Integer(7),
            Value::Integer(42),
            Value::Text("it's mine".into()),
            Value::Null,
        ],
    ));
    dump.push_comment("Error exporting from Ratings: no such table: Ratings");
    dump
}

#[test]
fn test_both_formats_reparse() {
    let dump = sample_dump();
    for format in [DumpFormat::Sql, DumpFormat::Json] {
        let bytes = dump.encode(format).unwrap();
        assert_eq!(Dump::decode(&bytes, format).unwrap(), dump, "{format}");
    }
}

#[test]
fn test_encoding_is_deterministic() {
    let dump = sample_dump();
    for format in [DumpFormat::Sql, DumpFormat::Json] {
        assert_eq!(dump.encode(format).unwrap(), dump.encode(format).unwrap());
    }
}

#[test]
fn test_sql_payload_contents() {
    let sql = String::from_utf8(sample_dump().encode(DumpFormat::Sql).unwrap()).unwrap();
    let lines: Vec<&str> = sql.lines().collect();

    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains("'it''s mine'"));
    assert!(lines[1].ends_with("NULL);"));
    assert_eq!(
        lines[2],
        "-- Error exporting from Ratings: no such table: Ratings"
    );
}

#[test]
fn test_bundle_layout_for_hostile_subject() {
    let subject = sanitize_subject("../alice");
    let names = MemberNames::new(&subject, DumpFormat::Sql, false);
    let payload = sample_dump().encode(DumpFormat::Sql).unwrap();
    let signature = armor_encode(ArmorType::Signature, &[("Version", "1")], b"sig");

    let zip = write_archive(&[
        (&names.payload, &payload),
        (&names.signature, signature.as_bytes()),
    ])
    .unwrap();

    let archive = ExportArchive::read(&zip).unwrap();
    assert!(!archive.is_encrypted());
    assert!(archive.payload_name.starts_with(&subject));
    assert!(archive.signature_name.starts_with(&subject));
    assert_eq!(archive.payload, payload);

    let sig = armor_decode(std::str::from_utf8(&archive.signature).unwrap()).unwrap();
    assert_eq!(sig.armor_type, ArmorType::Signature);
    assert_eq!(sig.payload, b"sig");
}
