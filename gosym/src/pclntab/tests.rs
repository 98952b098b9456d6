use super::*;
use tracing::debug;

#[test]
fn line_increments_then_pc_advance() {
    // Three "add n to line" opcodes, then one PC advance of 0x10.
    let data: &[u8] = &[3, 10, 64, 0x80 + 0x10];
    let t = LineTable::new(data, 0x1000);
    let (rest, pc, line) = t.parse(u64::MAX, -1);
    assert!(rest.is_empty());
    assert_eq!(line, 3 + 10 + 64);
    assert_eq!(pc, 0x1000 + OLD_QUANTUM * 3 + OLD_QUANTUM * 0x10);
}

#[test]
fn line_decrement_and_long_delta() {
    #[rustfmt::skip]
    let data: &[u8] = &[
        0, 0x00, 0x00, 0x01, 0x00,  // line += 256
        64 + 6,                     // line -= 6
        0, 0xff, 0xff, 0xff, 0xfe,  // line += -2
    ];
    let t = LineTable::new(data, 0);
    let (rest, pc, line) = t.parse(u64::MAX, -1);
    assert!(rest.is_empty());
    assert_eq!(line, 248);
    assert_eq!(pc, 3);
}

#[test]
fn truncated_long_delta_ends_stream() {
    let data: &[u8] = &[5, 0, 0x00, 0x01];
    let t = LineTable::new(data, 0);
    let (rest, pc, line) = t.parse(u64::MAX, -1);
    assert!(rest.is_empty());
    assert_eq!(line, 5);
    assert_eq!(pc, 2);
}

#[test]
fn parse_stops_at_target_line() {
    let data: &[u8] = &[1, 1, 1, 1];
    let t = LineTable::new(data, 0x100);
    let (rest, pc, line) = t.parse(u64::MAX, 2);
    assert_eq!(line, 2);
    assert_eq!(pc, 0x102);
    assert_eq!(rest.len(), 2);
}

#[test]
fn slice_resumes_stream() {
    #[rustfmt::skip]
    let data: &[u8] = &[
        5,              // 0x1000: line 5
        0x80 + 0x0f,    // pc -> 0x1010
        3,              // 0x1010: line 8
        0x80 + 0x20,    // pc -> 0x1031
        1,              // 0x1031: line 9
    ];
    let t = LineTable::new(data, 0x1000);

    let f1 = t.slice(0x1000);
    assert_eq!((f1.pc, f1.line), (0x1001, 5));
    assert_eq!(f1.pc_to_line(0x1004), Some(5));

    let f2 = f1.slice(0x1010);
    assert_eq!((f2.pc, f2.line), (0x1011, 8));
    assert_eq!(f2.pc_to_line(0x1020), Some(8));
    assert_eq!(f2.pc_to_line(0x1031), Some(9));

    // The original cursor is not moved by slicing.
    assert_eq!((t.pc, t.line), (0x1000, 0));
}

#[test]
fn line_to_pc() {
    let data: &[u8] = &[5, 0x80 + 0x0f, 3];
    let t = LineTable::new(data, 0x1000);
    assert_eq!(t.line_to_pc(5, u64::MAX), Some(0x1000));
    assert_eq!(t.line_to_pc(8, u64::MAX), Some(0x1010));
    assert_eq!(t.line_to_pc(7, u64::MAX), None);
    assert_eq!(t.line_to_pc(8, 0x1005), None);
}

/// Builds a Go 1.2 table: one function `main.main` at `[0x1000, 0x1100)`, in files `main.go`
/// (for `[0x1000, 0x1040)`) and `util.go`, on line 10 (for `[0x1000, 0x1010)`) then line 12.
pub(crate) fn go12_table(ptr_size: u8, big_endian: bool) -> Vec<u8> {
    struct W {
        data: Vec<u8>,
        big_endian: bool,
    }
    impl W {
        fn u32(&mut self, v: u32) {
            let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
            self.data.extend_from_slice(&b);
        }
        fn uintptr(&mut self, v: u64, ptr_size: u8) {
            if ptr_size == 8 {
                let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
                self.data.extend_from_slice(&b);
            } else {
                self.u32(v as u32);
            }
        }
        fn patch_u32(&mut self, at: usize, v: u32) {
            let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
            self.data[at..at + 4].copy_from_slice(&b);
        }
        fn patch_uintptr(&mut self, at: usize, v: u64, ptr_size: u8) {
            if ptr_size == 8 {
                let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
                self.data[at..at + 8].copy_from_slice(&b);
            } else {
                self.patch_u32(at, v as u32);
            }
        }
    }

    let ps = ptr_size as usize;
    let mut w = W {
        data: Vec::new(),
        big_endian,
    };

    w.u32(GO12_MAGIC);
    w.data.extend_from_slice(&[0, 0, 1, ptr_size]);
    w.uintptr(1, ptr_size); // nfunctab

    w.uintptr(0x1000, ptr_size); // entry
    let funcoff_at = w.data.len();
    w.uintptr(0, ptr_size); // funcoff, patched below
    w.uintptr(0x1100, ptr_size); // end pc
    let fileoff_at = w.data.len();
    w.u32(0); // file table offset, patched below

    let filetab_at = w.data.len();
    w.u32(3); // nfiletab
    w.u32(0); // file 1, patched below
    w.u32(0); // file 2, patched below

    let func_at = w.data.len();
    w.uintptr(0x1000, ptr_size); // entry
    w.u32(0); // nameoff, patched below
    w.u32(0x10); // args
    w.u32(0x20); // frame
    w.u32(0); // pcsp
    w.u32(0); // pcfile, patched below
    w.u32(0); // pcln, patched below

    let name_at = w.data.len();
    w.data.extend_from_slice(b"main.main\0");
    let file1_at = w.data.len();
    w.data.extend_from_slice(b"main.go\0");
    let file2_at = w.data.len();
    w.data.extend_from_slice(b"util.go\0");

    // file 1 until 0x1040, then file 2 until 0x1100
    let pcfile_at = w.data.len();
    w.data.extend_from_slice(&[0x04, 0x40, 0x02, 0xc0, 0x01, 0x00]);
    // line 10 until 0x1010, then line 12 until 0x1100
    let pcln_at = w.data.len();
    w.data.extend_from_slice(&[0x16, 0x10, 0x04, 0xf0, 0x01, 0x00]);

    w.patch_uintptr(funcoff_at, func_at as u64, ptr_size);
    w.patch_u32(fileoff_at, filetab_at as u32);
    w.patch_u32(filetab_at + 4, file1_at as u32);
    w.patch_u32(filetab_at + 8, file2_at as u32);
    w.patch_u32(func_at + ps, name_at as u32);
    w.patch_u32(func_at + ps + 16, pcfile_at as u32);
    w.patch_u32(func_at + ps + 20, pcln_at as u32);

    w.data
}

#[test]
fn go12_header_little_endian() {
    let data = go12_table(8, false);
    let t = LineTable::new(&data, 0x1000);
    let go12 = t.go12().expect("expected a Go 1.2 table");
    assert_eq!(go12.order, ByteOrder::Little);
    assert_eq!(go12.quantum, 1);
    assert_eq!(go12.ptr_size, 8);
    assert_eq!(go12.nfunctab, 1);
    assert_eq!(go12.nfiletab, 3);

    let t = Rc::new(LineTable::new(&data, 0x1000));
    let go12 = t.go12().unwrap();
    let funcs = go12.funcs(&t).unwrap();
    assert_eq!(funcs.len(), 1);
    assert_eq!(funcs[0].sym.name, "main.main");
    assert_eq!(funcs[0].entry, 0x1000);
    assert_eq!(funcs[0].end, 0x1100);
    assert_eq!(funcs[0].frame_size, 0x20);
    assert!(Rc::ptr_eq(funcs[0].line_table.as_ref().unwrap(), &t));
}

#[test]
fn go12_header_big_endian() {
    let data = go12_table(4, true);
    let t = LineTable::new(&data, 0);
    let go12 = t.go12().expect("expected a Go 1.2 table");
    assert_eq!(go12.order, ByteOrder::Big);
    assert_eq!(go12.ptr_size, 4);
    assert_eq!(go12.pc_to_line(0x1010), Some(12));
    assert_eq!(go12.pc_to_file(0x1000).as_deref(), Some("main.go"));
}

#[test]
fn go12_header_rejects_without_failing() {
    let good = go12_table(8, false);

    // Too short.
    for len in 0..16 {
        assert!(Go12State::parse(&good[..len]).is_none(), "len {len}");
    }

    // Bad quantum.
    for quantum in [0, 3, 5, 8, 0xff] {
        let mut data = good.clone();
        data[6] = quantum;
        assert!(Go12State::parse(&data).is_none(), "quantum {quantum}");
    }

    // Bad pointer size.
    for ptr_size in [0, 2, 7, 16] {
        let mut data = good.clone();
        data[7] = ptr_size;
        assert!(Go12State::parse(&data).is_none(), "ptr_size {ptr_size}");
    }

    // Non-zero padding.
    let mut data = good.clone();
    data[5] = 1;
    assert!(Go12State::parse(&data).is_none());

    // Wrong magic, in either order.
    let mut data = good.clone();
    data[..4].copy_from_slice(&0xFFFF_FFFAu32.to_le_bytes());
    assert!(Go12State::parse(&data).is_none());
    data[..4].copy_from_slice(&0xFFFF_FFFAu32.to_be_bytes());
    assert!(Go12State::parse(&data).is_none());

    // Swapping the magic alone selects the other byte order, whose tables are then out of bounds.
    let mut data = good.clone();
    data[..4].copy_from_slice(&GO12_MAGIC.to_be_bytes());
    assert!(Go12State::parse(&data).is_none());

    // Truncated tables.
    assert!(Go12State::parse(&good[..40]).is_none());

    // The rejection is cached, and the table falls back to the old format.
    let t = LineTable::new(&good[..15], 0);
    assert!(!t.is_go12());
    assert!(!t.is_go12());
    assert_eq!(t.pc_to_file(0), None);
}

#[test]
fn go12_strings_are_memoized() {
    let data = go12_table(8, false);
    let t = LineTable::new(&data, 0);
    let go12 = t.go12().unwrap();

    let off = data.windows(10).position(|w| w == b"main.main\0").unwrap() as u32;
    let a = go12.string(off).unwrap();
    let b = go12.string(off).unwrap();
    assert_eq!(&*a, "main.main");
    assert!(Rc::ptr_eq(&a, &b));

    // An offset in the middle of a string is a different string.
    assert_eq!(&*go12.string(off + 5).unwrap(), "main");

    assert_eq!(go12.string(data.len() as u32 + 1), Err(crate::DecodingError::Truncated));
}

#[test]
fn go12_string_without_terminator_runs_to_end() {
    let mut data = go12_table(8, false);
    let off = data.len() as u32;
    data.extend_from_slice(b"tail");
    let t = LineTable::new(&data, 0);
    let go12 = t.go12().unwrap();

    assert_eq!(&*go12.string(off).unwrap(), "tail");
    assert_eq!(&*go12.string(off + 2).unwrap(), "il");
    assert_eq!(&*go12.string(data.len() as u32).unwrap(), "");
    debug!(num_funcs = go12.nfunctab, "unterminated string read");

    // Functions and files still decode.
    assert_eq!(go12.funcs(&Rc::new(LineTable::new(&data, 0))).unwrap().len(), 1);
    assert_eq!(go12.file_map().unwrap().len(), 2);
}

#[test]
fn go12_file_map_is_built_once() {
    let data = go12_table(8, false);
    let t = LineTable::new(&data, 0);
    let go12 = t.go12().unwrap();

    let first = go12.file_map().unwrap();
    let first_entries: Vec<(String, u32)> =
        first.iter().map(|(k, &v)| (k.to_string(), v)).collect();
    let second = go12.file_map().unwrap();
    assert!(std::ptr::eq(first, second));
    assert_eq!(
        first_entries,
        vec![("main.go".to_string(), 1), ("util.go".to_string(), 2)]
    );
}

#[test]
fn go12_lookups() {
    let data = go12_table(8, false);
    let t = LineTable::new(&data, 0);

    assert_eq!(t.pc_to_line(0x1000), Some(10));
    assert_eq!(t.pc_to_line(0x100f), Some(10));
    assert_eq!(t.pc_to_line(0x1010), Some(12));
    assert_eq!(t.pc_to_line(0x10ff), Some(12));
    assert_eq!(t.pc_to_line(0x1100), None);
    assert_eq!(t.pc_to_line(0xfff), None);

    assert_eq!(t.pc_to_file(0x103f).as_deref(), Some("main.go"));
    assert_eq!(t.pc_to_file(0x1040).as_deref(), Some("util.go"));
    assert_eq!(t.pc_to_file(0x1100), None);

    // Not supported by the Go 1.2 format.
    assert_eq!(t.line_to_pc(10, u64::MAX), None);
}
