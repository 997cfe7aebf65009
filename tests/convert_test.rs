//! Type hint conversion through the registry.

use std::collections::HashSet;

use annotated_schema::{
    ClassDef, ConversionError, Converter, Field, FieldKind, FieldOptions, Missing, SchemaField,
    TypeHint, TypeRegistry,
};
use serde_json::json;

fn hint(source: &str) -> TypeHint {
    TypeHint::parse(source).unwrap()
}

fn convert(registry: &TypeRegistry, source: &str) -> SchemaField {
    Converter::new(registry.clone())
        .convert(&hint(source), FieldOptions::new())
        .unwrap()
}

mod registry {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = TypeRegistry::new();
        for name in [
            "bool", "int", "float", "Decimal", "str", "date", "datetime", "time", "timedelta",
            "UUID", "List", "Sequence",
        ] {
            assert!(registry.has(&hint(name)), "{name} should be registered");
        }
        assert!(!TypeRegistry::empty().has(&hint("int")));
    }

    #[test]
    fn unregistered_type_is_named_in_the_error() {
        let err = TypeRegistry::new().get(&hint("IPv4Address")).unwrap_err();
        assert!(matches!(&err, ConversionError::UnregisteredType { hint } if hint == "IPv4Address"));
        assert!(err.to_string().contains("IPv4Address"));
    }

    #[test]
    fn parameterized_generics_fall_back_to_origin() {
        let registry = TypeRegistry::new();
        let list = registry.get(&hint("List")).unwrap();
        assert!(registry.get(&hint("List[int]")).unwrap().ptr_eq(&list));
        assert!(registry.has(&hint("Sequence[str]")));
    }

    #[test]
    fn exact_registration_beats_origin() {
        let registry = TypeRegistry::new();
        registry.register_field_for_type(hint("List[str]"), FieldKind::Raw);

        assert_eq!(convert(&registry, "List[str]").kind().unwrap().name(), "Raw");
        assert_eq!(convert(&registry, "List[int]").kind().unwrap().name(), "List");
    }

    #[test]
    fn registrations_are_shared_between_clones() {
        let registry = TypeRegistry::new();
        let handle = registry.clone();
        handle.register_field_for_type(hint("IPv4Address"), FieldKind::String);

        assert!(registry.has(&hint("IPv4Address")));
        assert!(registry.same_as(&handle));
        assert!(!registry.same_as(&TypeRegistry::new()));
    }

    #[test]
    fn registering_again_replaces() {
        let registry = TypeRegistry::new();
        registry.register_field_for_type(hint("int"), FieldKind::String);
        assert_eq!(convert(&registry, "int").kind().unwrap().name(), "String");
    }

    #[test]
    fn closures_can_be_registered() {
        let registry = TypeRegistry::new();
        let factory = registry.register_fn(hint("Port"), |_, _, options| {
            Ok(Field::new(FieldKind::Integer, options.metadata("port", json!(true))).into())
        });
        assert_eq!(factory.label(), "PortFieldFactory");

        let field = convert(&registry, "Port");
        let options = field.options().unwrap();
        assert_eq!(options.metadata["port"], json!(true));
        assert!(options.is_required());
    }
}

mod hints {
    use super::*;

    #[test]
    fn plain_types_are_required() {
        let field = convert(&TypeRegistry::new(), "int");
        let options = field.options().unwrap();
        assert!(options.is_required());
        assert!(!options.allows_none());
        assert_eq!(options.missing, None);
    }

    #[test]
    fn optional_types_allow_none() {
        let field = convert(&TypeRegistry::new(), "Optional[int]");
        let options = field.options().unwrap();
        assert!(!options.is_required());
        assert!(options.allows_none());
        assert_eq!(options.missing, Some(Missing::Absent));
        assert_eq!(field.kind().unwrap().name(), "Integer");
    }

    #[test]
    fn explicit_union_with_none_is_optional() {
        let field = convert(&TypeRegistry::new(), "Union[None, str]");
        assert!(field.options().unwrap().allows_none());
        assert_eq!(field.kind().unwrap().name(), "String");
    }

    #[test]
    fn configured_options_win_over_inferred_ones() {
        let converter = Converter::new(TypeRegistry::new());
        let field = converter
            .convert(
                &hint("Optional[int]"),
                FieldOptions::new().required(true).missing(json!(0)),
            )
            .unwrap();
        let options = field.options().unwrap();
        assert!(options.is_required());
        assert!(options.allows_none());
        assert_eq!(options.missing, Some(Missing::Value(json!(0))));
    }

    #[test]
    fn lists_convert_their_item_type() {
        let field = convert(&TypeRegistry::new(), "List[Optional[int]]");
        let list = field.resolve().unwrap();
        assert!(list.options().is_required());

        let item = list.container().unwrap();
        assert_eq!(item.kind().unwrap().name(), "Integer");
        assert!(item.options().unwrap().allows_none());
    }

    #[test]
    fn bare_list_holds_raw_items() {
        let field = convert(&TypeRegistry::new(), "List");
        let item = field.resolve().unwrap().container().unwrap();
        assert_eq!(item.kind().unwrap().name(), "Raw");
    }

    #[test]
    fn unsupported_unions_fail() {
        let err = Converter::new(TypeRegistry::new())
            .convert(&hint("Union[int, str]"), FieldOptions::new())
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnregisteredType { .. }));
    }

    #[test]
    fn class_vars_are_skipped() {
        let class = ClassDef::builder("Counter")
            .annotate("count", hint("int"))
            .annotate("instances", hint("ClassVar[int]"))
            .build()
            .unwrap();
        let converter = Converter::new(TypeRegistry::new());

        let fields = converter
            .convert_all(&class, &HashSet::new(), &Default::default())
            .unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), ["count"]);
    }

    #[test]
    fn ignored_names_are_skipped() {
        let class = ClassDef::builder("Point")
            .annotate("x", hint("int"))
            .annotate("y", hint("Unregistered"))
            .build()
            .unwrap();
        let converter = Converter::new(TypeRegistry::new());

        let ignore: HashSet<String> = ["y".to_string()].into();
        let fields = converter
            .convert_all(&class, &ignore, &Default::default())
            .unwrap();
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn converting_twice_gives_equal_fields() {
        let converter = Converter::new(TypeRegistry::new());
        let first = converter
            .convert(&hint("List[str]"), FieldOptions::new())
            .unwrap();
        let second = converter
            .convert(&hint("List[str]"), FieldOptions::new())
            .unwrap();
        assert_eq!(first.describe(), second.describe());
    }
}

mod values {
    use super::*;

    #[test]
    fn scalars_are_normalized_on_load() {
        let registry = TypeRegistry::new();
        let cases = [
            ("bool", json!("yes"), json!(true)),
            ("int", json!("42"), json!(42)),
            ("int", json!(3.0), json!(3)),
            ("float", json!("1.5"), json!(1.5)),
            ("Decimal", json!("1.10"), json!("1.10")),
            ("UUID", json!("67E55044-10B1-426F-9247-BB680E5FE0C8"), json!("67e55044-10b1-426f-9247-bb680e5fe0c8")),
            ("date", json!("2024-02-29"), json!("2024-02-29")),
        ];
        for (source, input, expected) in cases {
            let field = convert(&registry, source);
            assert_eq!(
                field.deserialize(Some(&input)).unwrap(),
                Some(expected),
                "loading {input} as {source}"
            );
        }
    }

    #[test]
    fn invalid_scalars_are_rejected() {
        let registry = TypeRegistry::new();
        for (source, input) in [
            ("int", json!("4x")),
            ("int", json!(1.5)),
            ("str", json!(12)),
            ("date", json!("2023-02-29")),
            ("datetime", json!("yesterday")),
            ("UUID", json!("not-a-uuid")),
        ] {
            let field = convert(&registry, source);
            assert!(field.deserialize(Some(&input)).is_err(), "{input} as {source}");
        }
    }

    #[test]
    fn list_errors_point_at_items() {
        let field = convert(&TypeRegistry::new(), "List[int]");
        let err = field.deserialize(Some(&json!([1, "two", 3, "four"]))).unwrap_err();
        let annotated_schema::ValidateError::Invalid { errors } = err else {
            panic!("expected invalid");
        };
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["/1", "/3"]);
    }

    #[test]
    fn missing_values_are_substituted() {
        let converter = Converter::new(TypeRegistry::new());
        let field = converter
            .convert(&hint("str"), FieldOptions::new().missing(json!("n/a")))
            .unwrap();
        assert_eq!(field.deserialize(None).unwrap(), Some(json!("n/a")));

        let required = convert(&TypeRegistry::new(), "str");
        assert!(required.deserialize(None).is_err());
        assert!(required.deserialize(Some(&json!(null))).is_err());
    }
}
