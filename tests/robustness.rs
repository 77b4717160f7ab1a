use magic_rules::{compile, from_u8, identify};
use proptest::collection::vec;
use proptest::prelude::*;

/// A small grammar of plausible rule lines.
const RULE_LINE: &str = concat!(
    "[>]{0,2}[0-9]{1,3} (byte|ubeshort|lelong|string|ledate)[&+/]?[0-9]? ",
    "[x<>=!&^]?[0-9a-z\\\\]{0,6} %[dsxuc]",
);

proptest! {
    #[test]
    fn builtin_is_deterministic(buf in vec(any::<u8>(), 0..600)) {
        let first = from_u8(&buf);
        prop_assert_eq!(first, from_u8(&buf));
    }

    #[test]
    fn any_offset_stays_in_bounds(offset in any::<i32>(), buf in vec(any::<u8>(), 0..64)) {
        let text = format!(
            "0 byte x root\n\
             >{o} belong x %d\n\
             >({o}.l+4) string x %s\n\
             >&{o} leshort x %u\n\
             >(&{o}.S-8) byte x %c\n",
            o = offset
        );
        let (table, errors) = compile(&text).unwrap();
        prop_assert!(errors.is_empty(), "{:?}", errors);
        prop_assert_eq!(table.len(), 5);

        let result = identify(&table, &buf, false);
        prop_assert!(result.description().unwrap_or("").starts_with("root"));
    }

    #[test]
    fn compiling_garbage_never_panics(text in "\\PC{0,200}") {
        let (table, errors) = compile(&text).unwrap();
        prop_assert!(table.len() + errors.len() <= text.lines().count());
    }

    #[test]
    fn compiled_garbage_can_be_evaluated(
        lines in vec(RULE_LINE, 1..8),
        buf in vec(any::<u8>(), 0..128),
    ) {
        let (table, _) = compile(&lines.join("\n")).unwrap();
        let _ = identify(&table, &buf, true);
    }
}
