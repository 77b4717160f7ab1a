mod builtin {

    extern crate magic_rules;

    use self::magic_rules::magic::builtin::{BUILTIN, SOURCE};
    use self::magic_rules::{compile, from_u8, match_u8, mime_from_u8, Match};

    fn described(s: &str) -> Match {
        Match::Described(s.to_string())
    }

    #[test]
    fn bundled_database_compiles_cleanly() {
        let (table, errors) = compile(SOURCE).unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(table, *BUILTIN);
    }

    /// Archive tests
    #[test]
    fn gzip() {
        let buf: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0, 0x03];
        assert_eq!(from_u8(&buf), described("gzip compressed data, deflated, from Unix"));
        assert!(match_u8("application/gzip", &buf));
    }

    #[test]
    fn zip() {
        let buf = b"PK\x03\x04\x14\x00\x00\x00";
        assert_eq!(from_u8(buf), described("Zip archive data, at least v2.0 to extract"));
    }

    /// Executable tests
    #[test]
    fn elf_x86_64() {
        let mut buf = [0u8; 64];
        buf[..4].copy_from_slice(b"\x7fELF");
        buf[4] = 2;
        buf[5] = 1;
        buf[6] = 1;
        buf[16] = 2;
        buf[18] = 62;
        assert_eq!(from_u8(&buf), described("ELF 64-bit LSB executable, x86-64, version 1"));
    }

    #[test]
    fn pe32_plus() {
        let mut buf = [0u8; 0x100];
        buf[..2].copy_from_slice(b"MZ");
        buf[0x3c] = 0x80;
        buf[0x80..0x84].copy_from_slice(b"PE\0\0");
        buf[0x84..0x86].copy_from_slice(&0x8664u16.to_le_bytes());
        buf[0x98..0x9a].copy_from_slice(&0x20bu16.to_le_bytes());
        assert_eq!(
            from_u8(&buf),
            described("MS-DOS executable, PE32+ executable (x86-64)")
        );
        assert!(match_u8("application/x-dosexec", &buf));
    }

    #[test]
    fn java_class() {
        let buf: [u8; 8] = [0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34];
        assert_eq!(from_u8(&buf), described("compiled Java class data, version 52.0"));
        assert_eq!(mime_from_u8(&buf), None);
    }

    #[test]
    fn shell_script() {
        assert_eq!(
            from_u8(b"#!/bin/sh\necho hi\n"),
            described("a /bin/sh script text executable")
        );
        assert_eq!(
            from_u8(b"#! /usr/bin/perl -w\n"),
            described("a /usr/bin/perl -w script text executable")
        );
    }

    /// Image tests
    #[test]
    fn png() {
        let mut buf = b"\x89PNG\r\n\x1a\n\0\0\0\x0dIHDR".to_vec();
        buf.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]);
        assert_eq!(
            from_u8(&buf),
            described("PNG image data, 1 x 1, 8-bit/color RGBA, non-interlaced")
        );
        assert!(match_u8("image/png", &buf));
    }

    #[test]
    fn gif() {
        let buf = b"GIF89a\x10\x00\x20\x00";
        assert_eq!(from_u8(buf), described("GIF image data, version 89a, 16 x 32"));
        assert_eq!(mime_from_u8(buf).unwrap().essence_str(), "image/gif");
    }

    /// Document tests
    #[test]
    fn pdf() {
        assert_eq!(from_u8(b"%PDF-1.7\n"), described("PDF document, version 1.7"));
    }

    #[test]
    fn html_ignores_case_and_blanks() {
        assert_eq!(from_u8(b"<!DOCTYPE   HTML>"), described("HTML document text"));
        assert!(match_u8("text/html", b"<!doctype html>"));
    }

    /// Container tests
    #[test]
    fn riff_children_carry_the_mime() {
        let buf = b"RIFF\x24\x00\x00\x00WAVEfmt ";
        assert_eq!(from_u8(buf), described("RIFF (little-endian) data, WAVE audio"));
        assert_eq!(mime_from_u8(buf).unwrap().essence_str(), "audio/x-wav");
    }

    /// Text tests
    #[test]
    fn unknown_data() {
        assert_eq!(from_u8(b"hello world\n"), Match::NoMatch);
        assert_eq!(from_u8(b""), Match::NoMatch);
        assert!(!match_u8("text/plain", b"hello world\n"));
        assert!(!match_u8("not a mime", b"%PDF-1.7\n"));
    }
}
