//! End-to-end codec behavior against small compiled specifications.

use asn1tools::{Asn1Error, BitString, Codec, Specification, Value, compile_string};
use pretty_assertions::assert_eq;

fn spec(text: &str, codec: Codec) -> Specification {
    compile_string(text, codec).unwrap()
}

// ----------------------------------------------------------------------
// Pinned wire vectors
// ----------------------------------------------------------------------

#[test]
fn ber_boolean() {
    let text = "M DEFINITIONS ::= BEGIN X ::= BOOLEAN END";
    for codec in [Codec::Ber, Codec::Der] {
        let spec = spec(text, codec);
        let encoded = spec.encode("X", &Value::Boolean(true)).unwrap();
        assert_eq!(hex::encode(&encoded), "0101ff");
        assert_eq!(spec.decode("X", &encoded).unwrap(), Value::Boolean(true));
    }
    // BER accepts any nonzero octet as TRUE; DER does not
    let ber = spec(text, Codec::Ber);
    assert_eq!(
        ber.decode("X", &hex::decode("010101").unwrap()).unwrap(),
        Value::Boolean(true)
    );
    let der = spec(text, Codec::Der);
    assert!(der.decode("X", &hex::decode("010101").unwrap()).is_err());
}

#[test]
fn ber_integer() {
    let spec = spec("M DEFINITIONS ::= BEGIN X ::= INTEGER END", Codec::Ber);
    let encoded = spec.encode("X", &Value::integer(128)).unwrap();
    assert_eq!(hex::encode(&encoded), "02020080");
    let encoded = spec.encode("X", &Value::integer(-128)).unwrap();
    assert_eq!(hex::encode(&encoded), "020180");
    assert_eq!(
        spec.decode("X", &hex::decode("020180").unwrap()).unwrap(),
        Value::integer(-128)
    );
}

#[test]
fn uper_constrained_integer() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN X ::= INTEGER (0..7) END",
        Codec::Uper,
    );
    assert_eq!(hex::encode(spec.encode("X", &Value::integer(5)).unwrap()), "a0");
    assert_eq!(hex::encode(spec.encode("X", &Value::integer(0)).unwrap()), "00");
    assert_eq!(
        spec.decode("X", &hex::decode("a0").unwrap()).unwrap(),
        Value::integer(5)
    );
    // out of range is a constraint violation
    assert!(matches!(
        spec.encode("X", &Value::integer(8)),
        Err(Asn1Error::Constraints { .. })
    ));
}

#[test]
fn uper_sequence_with_optional() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN \
         X ::= SEQUENCE { a INTEGER (0..3), b INTEGER (0..3) OPTIONAL } \
         END",
        Codec::Uper,
    );
    let absent = Value::record(vec![("a", Value::integer(2))]);
    let encoded = spec.encode("X", &absent).unwrap();
    assert_eq!(hex::encode(&encoded), "40");
    assert_eq!(spec.decode("X", &encoded).unwrap(), absent);

    let present = Value::record(vec![("a", Value::integer(2)), ("b", Value::integer(1))]);
    let encoded = spec.encode("X", &present).unwrap();
    assert_eq!(hex::encode(&encoded), "c8");
    assert_eq!(spec.decode("X", &encoded).unwrap(), present);
}

#[test]
fn jer_choice() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN X ::= CHOICE { a INTEGER, b BOOLEAN } END",
        Codec::Jer,
    );
    let value = Value::choice("b", Value::Boolean(true));
    let encoded = spec.encode("X", &value).unwrap();
    assert_eq!(String::from_utf8(encoded.clone()).unwrap(), r#"{"b":true}"#);
    assert_eq!(spec.decode("X", &encoded).unwrap(), value);
}

#[test]
fn uper_nested_message() {
    let text = "M DEFINITIONS ::= BEGIN \
                Msg ::= SEQUENCE { \
                    id INTEGER (0..63), \
                    payload CHOICE { num INTEGER (0..7), flag BOOLEAN }, \
                    extra OCTET STRING (SIZE (2)) OPTIONAL, \
                    ... } \
                END";
    let spec = spec(text, Codec::Uper);
    let value = Value::record(vec![
        ("id", Value::integer(33)),
        ("payload", Value::choice("num", Value::integer(5))),
        ("extra", Value::Bytes(vec![0xBE, 0xEF])),
    ]);
    let encoded = spec.encode("Msg", &value).unwrap();
    // ext 0, optional 1, id 100001, choice 0, num 101, extra BEEF, pad
    assert_eq!(hex::encode(&encoded), "615beef0");
    assert_eq!(spec.decode("Msg", &encoded).unwrap(), value);
}

#[test]
fn ber_explicit_and_implicit_tags() {
    let spec_explicit = spec(
        "M DEFINITIONS ::= BEGIN X ::= [5] EXPLICIT INTEGER END",
        Codec::Ber,
    );
    let encoded = spec_explicit.encode("X", &Value::integer(42)).unwrap();
    assert_eq!(hex::encode(&encoded), "a50302012a");
    assert_eq!(
        spec_explicit.decode("X", &encoded).unwrap(),
        Value::integer(42)
    );

    let spec_implicit = spec(
        "M DEFINITIONS ::= BEGIN X ::= [5] IMPLICIT INTEGER END",
        Codec::Ber,
    );
    let encoded = spec_implicit.encode("X", &Value::integer(42)).unwrap();
    assert_eq!(hex::encode(&encoded), "85012a");
}

#[test]
fn ber_object_identifier() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN X ::= OBJECT IDENTIFIER END",
        Codec::Ber,
    );
    let value = Value::text("1.2.840.113549");
    let encoded = spec.encode("X", &value).unwrap();
    assert_eq!(hex::encode(&encoded), "06062a864886f70d");
    assert_eq!(spec.decode("X", &encoded).unwrap(), value);
}

#[test]
fn ber_enumerated() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN E ::= ENUMERATED { red(0), green(5) } END",
        Codec::Ber,
    );
    let encoded = spec.encode("E", &Value::text("green")).unwrap();
    assert_eq!(hex::encode(&encoded), "0a0105");
    assert_eq!(spec.decode("E", &encoded).unwrap(), Value::text("green"));
}

#[test]
fn uper_enumerated_indices_follow_value_order() {
    // indices are assigned by ascending value, not declaration order
    let spec = spec(
        "M DEFINITIONS ::= BEGIN E ::= ENUMERATED { b(5), a(0) } END",
        Codec::Uper,
    );
    assert_eq!(hex::encode(spec.encode("E", &Value::text("a")).unwrap()), "00");
    assert_eq!(hex::encode(spec.encode("E", &Value::text("b")).unwrap()), "80");
    assert_eq!(
        spec.decode("E", &hex::decode("80").unwrap()).unwrap(),
        Value::text("b")
    );
}

#[test]
fn per_boundary_widths() {
    // ceil(log2 range) bits exactly
    let spec_byte = spec(
        "M DEFINITIONS ::= BEGIN X ::= INTEGER (0..255) END",
        Codec::Uper,
    );
    assert_eq!(
        spec_byte.encode("X", &Value::integer(255)).unwrap().len(),
        1
    );
    let spec_two = spec(
        "M DEFINITIONS ::= BEGIN X ::= INTEGER (0..65535) END",
        Codec::Uper,
    );
    let encoded = spec_two.encode("X", &Value::integer(0x1234)).unwrap();
    assert_eq!(hex::encode(&encoded), "1234");
    // a range of one value occupies no bits, but still one octet on the wire
    let spec_unit = spec(
        "M DEFINITIONS ::= BEGIN X ::= INTEGER (7..7) END",
        Codec::Uper,
    );
    assert_eq!(
        hex::encode(spec_unit.encode("X", &Value::integer(7)).unwrap()),
        "00"
    );
    assert_eq!(
        spec_unit.decode("X", &hex::decode("00").unwrap()).unwrap(),
        Value::integer(7)
    );
}

#[test]
fn aligned_per_uses_octet_fields() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN X ::= INTEGER (0..60000) END",
        Codec::Per,
    );
    let encoded = spec.encode("X", &Value::integer(5)).unwrap();
    assert_eq!(hex::encode(&encoded), "0005");
    assert_eq!(
        spec.decode("X", &encoded).unwrap(),
        Value::integer(5)
    );
}

// ----------------------------------------------------------------------
// DER canonical form
// ----------------------------------------------------------------------

#[test]
fn der_set_components_sorted_by_tag() {
    let text = "M DEFINITIONS ::= BEGIN S ::= SET { a INTEGER, b BOOLEAN } END";
    let value = Value::record(vec![("a", Value::integer(1)), ("b", Value::Boolean(true))]);

    let der = spec(text, Codec::Der);
    let encoded = der.encode("S", &value).unwrap();
    // BOOLEAN (tag 1) precedes INTEGER (tag 2) on the wire
    assert_eq!(hex::encode(&encoded), "31060101ff020101");
    assert_eq!(der.decode("S", &encoded).unwrap(), value);

    // BER keeps declaration order; DER rejects it as out of order
    let ber = spec(text, Codec::Ber);
    let ber_encoded = ber.encode("S", &value).unwrap();
    assert_eq!(hex::encode(&ber_encoded), "31060201010101ff");
    assert!(der.decode("S", &ber_encoded).is_err());
    assert_eq!(ber.decode("S", &ber_encoded).unwrap(), value);
}

#[test]
fn der_set_of_sorted_by_octets() {
    let text = "M DEFINITIONS ::= BEGIN T ::= SET OF INTEGER END";
    let value = Value::List(vec![
        Value::integer(3),
        Value::integer(1),
        Value::integer(2),
    ]);
    let der = spec(text, Codec::Der);
    let encoded = der.encode("T", &value).unwrap();
    assert_eq!(hex::encode(&encoded), "3109020101020102020103");
}

#[test]
fn der_default_omitted_and_materialized() {
    let text = "M DEFINITIONS ::= BEGIN D ::= SEQUENCE { v INTEGER DEFAULT 5 } END";
    let der = spec(text, Codec::Der);
    let encoded = der
        .encode("D", &Value::record(vec![("v", Value::integer(5))]))
        .unwrap();
    assert_eq!(hex::encode(&encoded), "3000");
    assert_eq!(
        der.decode("D", &encoded).unwrap(),
        Value::record(vec![("v", Value::integer(5))])
    );
    // a non-default value is present on the wire
    let encoded = der
        .encode("D", &Value::record(vec![("v", Value::integer(6))]))
        .unwrap();
    assert_eq!(hex::encode(&encoded), "3003020106");
}

#[test]
fn der_fixed_point() {
    let text = "M DEFINITIONS ::= BEGIN \
                D ::= SEQUENCE { v INTEGER DEFAULT 5, w BOOLEAN OPTIONAL } \
                END";
    let der = spec(text, Codec::Der);
    let value = Value::record(vec![("v", Value::integer(5)), ("w", Value::Boolean(true))]);
    let first = der.encode("D", &value).unwrap();
    let second = der
        .encode("D", &der.decode("D", &first).unwrap())
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn der_named_bit_string_trimmed() {
    let text = "M DEFINITIONS ::= BEGIN \
                B ::= BIT STRING { alpha(0), beta(1) } \
                END";
    let der = spec(text, Codec::Der);
    let untrimmed = Value::BitString(BitString::new(vec![0x80, 0x00], 16).unwrap());
    let encoded = der.encode("B", &untrimmed).unwrap();
    // trailing zero bits beyond the highest set bit are dropped
    assert_eq!(hex::encode(&encoded), "03020780");
    assert_eq!(
        der.decode("B", &encoded).unwrap(),
        Value::BitString(BitString::new(vec![0x80], 1).unwrap())
    );
}

#[test]
fn ber_indefinite_length_accepted_der_rejects() {
    let text = "M DEFINITIONS ::= BEGIN X ::= SEQUENCE { a BOOLEAN } END";
    let data = hex::decode("30800101ff0000").unwrap();
    let ber = spec(text, Codec::Ber);
    assert_eq!(
        ber.decode("X", &data).unwrap(),
        Value::record(vec![("a", Value::Boolean(true))])
    );
    let der = spec(text, Codec::Der);
    assert!(der.decode("X", &data).is_err());
}

// ----------------------------------------------------------------------
// Round trips across every codec
// ----------------------------------------------------------------------

const PERSON: &str = "M DEFINITIONS AUTOMATIC TAGS ::= BEGIN \
     Person ::= SEQUENCE { \
         name UTF8String, \
         age INTEGER (0..150) DEFAULT 42, \
         flags BIT STRING { alpha(0), beta(1) } (SIZE (2)) OPTIONAL, \
         payload OCTET STRING OPTIONAL, \
         kind ENUMERATED { small, large }, \
         scores SEQUENCE (SIZE (0..10)) OF INTEGER (0..100), \
         pick CHOICE { x INTEGER (0..7), y BOOLEAN }, \
         ... } \
     END";

fn person_value() -> Value {
    Value::record(vec![
        ("name", Value::text("Kalle")),
        ("age", Value::integer(40)),
        (
            "flags",
            Value::BitString(BitString::new(vec![0xC0], 2).unwrap()),
        ),
        ("payload", Value::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF])),
        ("kind", Value::text("large")),
        (
            "scores",
            Value::List(vec![Value::integer(1), Value::integer(99)]),
        ),
        ("pick", Value::choice("x", Value::integer(3))),
    ])
}

#[test]
fn round_trip_all_codecs() {
    for codec in [
        Codec::Ber,
        Codec::Der,
        Codec::Per,
        Codec::Uper,
        Codec::Jer,
        Codec::Xer,
    ] {
        let spec = spec(PERSON, codec);
        let value = person_value();
        let encoded = spec.encode("Person", &value).unwrap();
        let decoded = spec.decode("Person", &encoded).unwrap();
        assert_eq!(decoded, value, "round trip failed for {}", codec);
    }
}

#[test]
fn default_materialized_on_decode_everywhere() {
    let without_age = Value::record(vec![
        ("name", Value::text("x")),
        ("kind", Value::text("small")),
        ("scores", Value::List(vec![])),
        ("pick", Value::choice("y", Value::Boolean(false))),
    ]);
    for codec in [Codec::Ber, Codec::Der, Codec::Per, Codec::Uper, Codec::Jer, Codec::Xer] {
        let spec = spec(PERSON, codec);
        let encoded = spec.encode("Person", &without_age).unwrap();
        let decoded = spec.decode("Person", &encoded).unwrap();
        assert_eq!(
            decoded.field("age"),
            Some(&Value::integer(42)),
            "default not materialized for {}",
            codec
        );
    }
}

// ----------------------------------------------------------------------
// Extensibility tolerance
// ----------------------------------------------------------------------

#[test]
fn unknown_sequence_addition_survives_reencoding() {
    let v1 = "M DEFINITIONS ::= BEGIN X ::= SEQUENCE { a INTEGER (0..7), ... } END";
    let v2 = "M DEFINITIONS ::= BEGIN X ::= SEQUENCE { a INTEGER (0..7), ..., b BOOLEAN } END";

    for codec in [Codec::Uper, Codec::Per, Codec::Ber] {
        let old = spec(v1, codec);
        let new = spec(v2, codec);
        let value = Value::record(vec![("a", Value::integer(1)), ("b", Value::Boolean(true))]);
        let encoded = new.encode("X", &value).unwrap();

        let seen_by_old = old.decode("X", &encoded).unwrap();
        let fields = seen_by_old.as_record().unwrap();
        assert!(
            fields.iter().any(|(n, _)| n.starts_with("unknown-addition-")),
            "unknown addition not captured for {}",
            codec
        );

        let reencoded = old.encode("X", &seen_by_old).unwrap();
        assert_eq!(reencoded, encoded, "re-encode not verbatim for {}", codec);
        assert_eq!(new.decode("X", &reencoded).unwrap(), value);
    }
}

#[test]
fn unknown_choice_alternative_survives_reencoding() {
    let v1 = "M DEFINITIONS ::= BEGIN C ::= CHOICE { a INTEGER (0..7), ... } END";
    let v2 = "M DEFINITIONS ::= BEGIN C ::= CHOICE { a INTEGER (0..7), ..., b BOOLEAN } END";

    let old = spec(v1, Codec::Uper);
    let new = spec(v2, Codec::Uper);
    let value = Value::choice("b", Value::Boolean(true));
    let encoded = new.encode("C", &value).unwrap();

    let seen_by_old = old.decode("C", &encoded).unwrap();
    let (name, inner) = seen_by_old.as_choice().unwrap();
    assert_eq!(name, "unknown-addition-0");
    assert!(matches!(inner, Value::Opaque(_)));

    let reencoded = old.encode("C", &seen_by_old).unwrap();
    assert_eq!(reencoded, encoded);
    assert_eq!(new.decode("C", &reencoded).unwrap(), value);
}

#[test]
fn extensible_integer_value_outside_root() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN X ::= INTEGER (0..7, ...) END",
        Codec::Uper,
    );
    for value in [Value::integer(5), Value::integer(1000), Value::integer(-3)] {
        let encoded = spec.encode("X", &value).unwrap();
        assert_eq!(spec.decode("X", &encoded).unwrap(), value);
    }
}

// ----------------------------------------------------------------------
// Text codecs
// ----------------------------------------------------------------------

#[test]
fn gser_output() {
    let text = "M DEFINITIONS ::= BEGIN \
                Msg ::= SEQUENCE { id INTEGER, ok BOOLEAN, data OCTET STRING } \
                END";
    let spec = spec(text, Codec::Gser);
    let value = Value::record(vec![
        ("id", Value::integer(33)),
        ("ok", Value::Boolean(true)),
        ("data", Value::Bytes(vec![0xBE, 0xEF])),
    ]);
    let encoded = spec.encode("Msg", &value).unwrap();
    let rendered = String::from_utf8(encoded).unwrap();
    assert_eq!(
        rendered,
        "{\n    id 33,\n    ok TRUE,\n    data 'BEEF'H\n}"
    );
    // output-only codec
    assert!(spec.decode("Msg", rendered.as_bytes()).is_err());
}

#[test]
fn jer_keys_sorted_ascii() {
    let text = "M DEFINITIONS ::= BEGIN \
                Msg ::= SEQUENCE { zebra INTEGER, apple INTEGER } \
                END";
    let spec = spec(text, Codec::Jer);
    let value = Value::record(vec![
        ("zebra", Value::integer(1)),
        ("apple", Value::integer(2)),
    ]);
    let encoded = spec.encode("Msg", &value).unwrap();
    assert_eq!(
        String::from_utf8(encoded).unwrap(),
        r#"{"apple":2,"zebra":1}"#
    );
}

#[test]
fn xer_round_trip_booleans_and_enums() {
    let text = "M DEFINITIONS ::= BEGIN \
                Msg ::= SEQUENCE { ok BOOLEAN, color ENUMERATED { red, blue } } \
                END";
    let spec = spec(text, Codec::Xer);
    let value = Value::record(vec![
        ("ok", Value::Boolean(false)),
        ("color", Value::text("blue")),
    ]);
    let encoded = spec.encode("Msg", &value).unwrap();
    let rendered = String::from_utf8(encoded.clone()).unwrap();
    assert!(rendered.contains("<false />"), "{}", rendered);
    assert!(rendered.contains("<blue />"), "{}", rendered);
    assert_eq!(spec.decode("Msg", &encoded).unwrap(), value);
}

// ----------------------------------------------------------------------
// Robustness
// ----------------------------------------------------------------------

#[test]
fn arbitrary_octets_never_panic() {
    let codecs = [
        Codec::Ber,
        Codec::Der,
        Codec::Per,
        Codec::Uper,
        Codec::Jer,
        Codec::Xer,
    ];
    let specs: Vec<Specification> = codecs.iter().map(|c| spec(PERSON, *c)).collect();

    // deterministic pseudo-random byte soup
    let mut state = 0x2545F4914F6CDD1Du64;
    for _ in 0..200 {
        let len = (state % 40) as usize;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            data.push((state >> 33) as u8);
        }
        for spec in &specs {
            // must return an error or a value, never crash
            let _ = spec.decode("Person", &data);
        }
    }
}

#[test]
fn truncated_input_is_a_decode_error() {
    let spec_uper = spec(
        "M DEFINITIONS ::= BEGIN X ::= SEQUENCE { a INTEGER (0..65535), b OCTET STRING } END",
        Codec::Uper,
    );
    let value = Value::record(vec![
        ("a", Value::integer(7)),
        ("b", Value::Bytes(vec![1, 2, 3, 4])),
    ]);
    let encoded = spec_uper.encode("X", &value).unwrap();
    let err = spec_uper.decode("X", &encoded[..2]).unwrap_err();
    assert!(matches!(err, Asn1Error::Decode { .. }));
}

#[test]
fn error_paths_are_dotted() {
    let spec = spec(
        "M DEFINITIONS ::= BEGIN \
         X ::= SEQUENCE { inner SEQUENCE { deep INTEGER } } \
         END",
        Codec::Ber,
    );
    let bad = Value::record(vec![(
        "inner",
        Value::record(vec![("deep", Value::Boolean(true))]),
    )]);
    let err = spec.encode("X", &bad).unwrap_err();
    assert!(
        err.to_string().contains("X.inner.deep"),
        "unexpected error: {}",
        err
    );
}
