mod compile {

    extern crate magic_rules;

    use self::magic_rules::{
        compile, compile_database, compile_line, ArithOp, FieldType, LineError, MagicTable,
        MaskOp, MatchValue, Offset, ParseError, Relation, StringFlags,
    };
    use self::magic_rules::magic::ruleset::MAX_DESC;

    fn errors(text: &str) -> Vec<LineError> {
        compile(text).unwrap().1
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# header\n\n   \n0 byte 1 one\r\n  # indented comment\n";
        let (table, errors) = compile(text).unwrap();
        assert!(errors.is_empty());
        assert_eq!(table.len(), 1);
        assert_eq!(table.rules()[0].description, "one");
    }

    #[test]
    fn indented_rules_compile() {
        assert!(compile_line("  0 byte 1 one").is_ok());

        let (table, errors) = compile("  0 byte 1 one\n\t>1 byte 2 two\n").unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
        let levels: Vec<u16> = table.rules().iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![0, 1]);
    }

    #[test]
    fn basic_rule() {
        let rule = compile_line(">>8 ubeshort >0x10 big enough").unwrap();
        assert_eq!(rule.level, 2);
        assert_eq!(rule.offset, Offset::Absolute(8));
        assert_eq!(rule.field_type, FieldType::BEShort);
        assert!(rule.unsigned);
        assert_eq!(rule.relation, Relation::Greater);
        assert_eq!(rule.value, MatchValue::Numeric(0x10));
        assert_eq!(rule.description, "big enough");
        assert!(!rule.no_leading_space);
    }

    #[test]
    fn numbers_follow_c_literals() {
        assert_eq!(compile_line("010 byte 010 x").unwrap().offset, Offset::Absolute(8));
        assert_eq!(compile_line("0 long 1L x").unwrap().value, MatchValue::Numeric(1));
        assert_eq!(compile_line("0 byte 0xff x").unwrap().value, MatchValue::Numeric(-1));
        assert_eq!(compile_line("0 ubyte 0xff x").unwrap().value, MatchValue::Numeric(255));
    }

    #[test]
    fn implicit_equal_and_always() {
        let eq = compile_line("0 byte 7").unwrap();
        assert_eq!(eq.relation, Relation::Equal);
        assert_eq!(eq.description, "");

        let any = compile_line("0 string x %s").unwrap();
        assert_eq!(any.relation, Relation::Always);
        assert!(any.value.is_empty());
    }

    #[test]
    fn mask_operations() {
        let rule = compile_line("0 ubelong~^0xff 1 x").unwrap();
        assert_eq!(
            rule.mask_op,
            Some(MaskOp {
                op: ArithOp::Xor,
                inverted: true
            })
        );
        assert_eq!(rule.mask, 0xff);

        let rule = compile_line("0 byte&0x80 0x80 x").unwrap();
        assert_eq!(rule.mask_op, Some(MaskOp::and()));
    }

    #[test]
    fn string_values_and_flags() {
        let rule = compile_line("0 string/cB \\<?xml\\ version xml").unwrap();
        assert_eq!(
            rule.value,
            MatchValue::Bytes {
                data: b"<?xml version".to_vec(),
                flags: StringFlags::IGNORE_CASE | StringFlags::COMPACT_BLANK,
            }
        );
        assert_eq!(rule.description, "xml");
    }

    #[test]
    fn backspace_description() {
        let rule = compile_line(">4 byte 1 \\b, one").unwrap();
        assert!(rule.no_leading_space);
        assert_eq!(rule.description, ", one");
    }

    #[test]
    fn relative_spellings() {
        for line in &[">&(4.b) byte 1 x", ">(&4.b) byte 1 x"] {
            let rule = compile_line(line).unwrap();
            assert!(rule.relative_to_parent, "{}", line);
            assert!(matches!(rule.offset, Offset::Indirect(_)), "{}", line);
        }
        let rule = compile_line(">&-2 byte 1 x").unwrap();
        assert!(rule.relative_to_parent);
        assert_eq!(rule.offset, Offset::Absolute(-2));
    }

    /// Rejected lines
    #[test]
    fn bad_lines() {
        assert_eq!(
            compile_line("0 quad 1 x"),
            Err(ParseError::UnknownType("quad".to_string()))
        );
        assert!(matches!(compile_line("abc byte 1 x"), Err(ParseError::InvalidOffset(_))));
        assert_eq!(compile_line("0 string/q abc x"), Err(ParseError::UnknownStringFlag('q')));
        assert!(matches!(
            compile_line("0 string <abc x"),
            Err(ParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile_line("0 byte/0 0 x"),
            Err(ParseError::InvalidValue { reason: "zero divisor", .. })
        ));
        assert!(matches!(compile_line("0 byte zz x"), Err(ParseError::InvalidValue { .. })));
    }

    #[test]
    fn description_limit() {
        let ok = format!("0 byte 1 {}", "a".repeat(64));
        assert!(compile_line(&ok).is_ok());
        let long = format!("0 byte 1 {}", "a".repeat(65));
        assert_eq!(compile_line(&long), Err(ParseError::DescriptionTooLong(65)));
        assert_eq!(
            ParseError::DescriptionTooLong(65).to_string(),
            format!("description is 65 bytes long, the limit is {}", MAX_DESC)
        );
    }

    /// Diagnostics
    #[test]
    fn errors_carry_line_numbers() {
        let text = "# comment\n0 byte 1 one\n0 quad 1 bad\n0 byte 2 two\n";
        assert_eq!(
            errors(text),
            vec![LineError {
                line: 3,
                error: ParseError::UnknownType("quad".to_string()),
            }]
        );
        assert_eq!(errors(text)[0].to_string(), "line 3: type `quad` invalid");
    }

    #[test]
    fn failed_line_drops_its_continuations() {
        let (table, errors) = compile(
            "0 byte 1 one\n\
             >0 quad 1 bad\n\
             >>1 byte 1 orphan\n\
             >0 byte 1 sibling\n\
             0 byte 2 two\n",
        )
        .unwrap();
        assert_eq!(errors.len(), 1);
        let descriptions: Vec<&str> =
            table.rules().iter().map(|r| r.description.as_str()).collect();
        assert_eq!(descriptions, vec!["one", "sibling", "two"]);
    }

    #[test]
    fn level_jumps() {
        let (table, errors) = compile("0 byte 1 a\n>>1 byte 2 b\n>1 byte 3 c\n").unwrap();
        assert_eq!(
            errors,
            vec![LineError {
                line: 2,
                error: ParseError::LevelJump { level: 2, parent: 1 },
            }]
        );
        assert_eq!(table.len(), 2);

        assert_eq!(
            errors_of_first_line(">1 byte 1 x"),
            ParseError::LevelJump { level: 1, parent: 0 }
        );
    }

    fn errors_of_first_line(text: &str) -> ParseError {
        errors(text).remove(0).error
    }

    /// Annotations
    #[test]
    fn mime_annotations() {
        let text = "0 string GIF8 gif\n!:mime image/gif\n!:apple ????GIFf\n";
        let (table, errors) = compile(text).unwrap();
        assert!(errors.is_empty());
        let mime = table.rules()[0].mime.as_ref().unwrap();
        assert_eq!(mime.essence_str(), "image/gif");

        assert_eq!(errors_of_first_line("!:mime text/plain\n"), ParseError::OrphanAnnotation);
        assert_eq!(
            errors_of_first_line("0 byte 1 x\n!:mime notamime\n"),
            ParseError::InvalidMime("notamime".to_string())
        );
    }

    #[test]
    fn annotation_of_dropped_line_is_ignored() {
        let (table, errors) = compile("0 byte 1 one\n0 quad 1 bad\n!:mime image/gif\n").unwrap();
        assert_eq!(errors.len(), 1);
        assert!(table.rules()[0].mime.is_none());
    }

    /// Tables
    #[test]
    fn databases_concatenate() {
        let lines = vec!["0 byte 1 one", ">1 byte 2 child"];
        let (mut table, _) = compile_database(lines).unwrap();
        let (other, _) = compile("0 byte 3 three\n").unwrap();
        table.append(other).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.entries().count(), 2);
    }

    #[test]
    fn empty_input() {
        let (table, errors) = compile("").unwrap();
        assert_eq!(table, MagicTable::new());
        assert!(errors.is_empty());
    }
}
