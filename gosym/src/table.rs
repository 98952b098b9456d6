//! Assembles symbol records and the PC-line table into functions and objects.


use crate::DecodingError;
use crate::pclntab::LineTable;
use crate::symtab::SymtabIter;
use bstr::{BStr, ByteSlice};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::rc::Rc;
use tracing::{info, trace, trace_span};

/// The type code of a symbol. This is an ASCII letter; lowercase letters are static (file-local)
/// symbols.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
#[repr(transparent)]
pub struct SymType(pub u8);

macro_rules! sym_types {
    ($( $(#[$a:meta])*  $name:ident = $value:expr;)*) => {
        impl SymType {
            $(
                $(#[$a])*
                #[allow(missing_docs)]
                pub const $name: SymType = SymType($value);
            )*
        }

        impl std::fmt::Debug for SymType {
            fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
                let s: &str = match *self {
                    $( SymType::$name => stringify!($name), )*
                    _ => return write!(fmt, "{}", self),
                };
                write!(fmt, "{s}('{self}')")
            }
        }
    }
}

sym_types! {
    /// Function entry.
    TEXT = b'T';
    STATIC_TEXT = b't';
    /// Function entry of a function that makes no calls.
    LEAF = b'L';
    STATIC_LEAF = b'l';
    DATA = b'D';
    STATIC_DATA = b'd';
    BSS = b'B';
    STATIC_BSS = b'b';
    /// Source file path, as a list of file name indexes.
    FILE_PATH = b'z';
    /// Source file path that ends a line range, as a list of file name indexes.
    FILE_PATH_END = b'Z';
    /// Defines a file name component. The value is its index.
    FILE_NAME = b'f';
    /// Function parameter.
    PARAM = b'p';
    /// Function local (automatic) variable.
    AUTO = b'a';
    /// Frame size of the preceding function. The value is the size.
    FRAME_SIZE = b'm';
}

impl SymType {
    /// Indicates a function entry symbol.
    pub fn is_func(self) -> bool {
        matches!(self, Self::TEXT | Self::STATIC_TEXT | Self::LEAF | Self::STATIC_LEAF)
    }

    /// Indicates a path symbol.
    pub fn is_path(self) -> bool {
        matches!(self, Self::FILE_PATH | Self::FILE_PATH_END)
    }

    /// Indicates a symbol with an address: text, data, or bss.
    pub fn is_addressed(self) -> bool {
        self.is_func()
            || matches!(
                self,
                Self::DATA | Self::STATIC_DATA | Self::BSS | Self::STATIC_BSS
            )
    }
}

impl std::fmt::Display for SymType {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(fmt, "{}", self.0 as char)
        } else {
            write!(fmt, "0x{:02x}", self.0)
        }
    }
}

/// Index of a [`Func`] within [`Table::funcs`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Ord, PartialOrd)]
pub struct FuncIndex(pub usize);

/// Index of an [`Obj`] within [`Table::objs`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Ord, PartialOrd)]
pub struct ObjIndex(pub usize);

impl std::fmt::Display for FuncIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::fmt::Display for ObjIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// A decoded symbol.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Sym {
    /// The symbol value. For text, data and bss symbols this is an address.
    pub value: u64,
    /// The symbol type.
    pub typ: SymType,
    /// The symbol name, with `·` replaced by `.`. For path symbols, the joined path.
    pub name: String,
    /// The address of the Go type descriptor, or 0.
    pub go_type: u64,
    /// For function entry symbols, the function they start.
    pub func: Option<FuncIndex>,
}

impl Sym {
    /// Indicates whether this symbol is static (not visible outside its file).
    pub fn is_static(&self) -> bool {
        self.typ.0 >= b'a'
    }

    /// The package part of the name: `"net/http"` for `"net/http.(*Client).Do"`.
    pub fn package_name(&self) -> &str {
        let name = self.name.as_str();
        if name.starts_with("go.") || name.starts_with("type.") {
            return "";
        }
        let path_end = name.rfind('/').unwrap_or(0);
        match name[path_end..].find('.') {
            Some(i) => &name[..path_end + i],
            None => "",
        }
    }

    /// The receiver type part of a method name: `"(*Client)"` for `"net/http.(*Client).Do"`.
    /// Empty if the symbol is not a method.
    pub fn receiver_name(&self) -> &str {
        let name = self.name.as_str();
        let path_end = name.rfind('/').unwrap_or(0);
        let tail = &name[path_end..];
        match (tail.find('.'), tail.rfind('.')) {
            (Some(l), Some(r)) if l != r => &tail[l + 1..r],
            _ => "",
        }
    }

    /// The last component of the name: `"Do"` for `"net/http.(*Client).Do"`.
    pub fn base_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(i) => &self.name[i + 1..],
            None => &self.name,
        }
    }
}

/// A function.
#[derive(Clone, Debug)]
pub struct Func<'a> {
    /// The entry symbol of the function.
    pub sym: Sym,
    /// The address of the first instruction.
    pub entry: u64,
    /// The address just past the last instruction. For the last function of a table without an
    /// end marker this is 0.
    pub end: u64,
    /// Parameter symbols, in table order.
    pub params: Vec<Sym>,
    /// Local variable symbols, in table order.
    pub locals: Vec<Sym>,
    /// The frame size.
    pub frame_size: u64,
    /// The PC-line table of this function.
    pub line_table: Option<Rc<LineTable<'a>>>,
    /// The object that contains this function.
    pub obj: Option<ObjIndex>,
}

impl<'a> Func<'a> {
    /// Indicates whether `pc` is within `[entry, end)`.
    pub fn contains(&self, pc: u64) -> bool {
        self.entry <= pc && pc < self.end
    }
}

/// An object: one compiled unit, such as a package, that contributed functions to the program.
///
/// Go 1.2 and later binaries have a single object.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Obj {
    /// The run of path symbols that describes the files of this object, as a range of
    /// [`Table::syms`]. `None` for Go 1.2 and later binaries.
    pub paths: Option<Range<usize>>,
    /// The functions of this object, as a range of [`Table::funcs`].
    pub funcs: Range<usize>,
}

/// Returned from [`Obj::line_from_aline`] when the path symbols pop more than they push.
pub const MALFORMED_SYMBOL_TABLE: &str = "<malformed symbol table>";

impl Obj {
    /// Converts an absolute line number (as stored in an old-format line table) into a file name
    /// and a line number within that file, using the path symbols of this object.
    ///
    /// `syms` is the symbol list of the table that owns this object.
    pub fn line_from_aline(&self, syms: &[Sym], aline: i32) -> Option<(String, i32)> {
        struct StackEnt<'s> {
            path: &'s str,
            start: i64,
            offset: i64,
        }

        let paths = &syms[self.paths.clone()?];
        let aline = aline as i64;

        // stack[0] stands for "no path"; it is never popped.
        let mut stack: Vec<StackEnt> = vec![StackEnt {
            path: "",
            start: 0,
            offset: 0,
        }];

        for s in paths.iter() {
            let val = s.value as i64;
            if val > aline {
                break;
            }

            if val == 1 {
                // Start a new stack.
                stack.truncate(1);
                stack.push(StackEnt {
                    path: &s.name,
                    start: val,
                    offset: 0,
                });
            } else if s.name.is_empty() {
                if stack.len() == 1 {
                    return Some((MALFORMED_SYMBOL_TABLE.to_string(), 0));
                }
                let Some(tos) = stack.pop() else {
                    break;
                };
                if let Some(prev) = stack.last_mut() {
                    prev.offset += val - tos.start;
                }
            } else {
                stack.push(StackEnt {
                    path: &s.name,
                    start: val,
                    offset: 0,
                });
            }
        }

        if stack.len() == 1 {
            return None;
        }
        let tos = stack.last()?;
        Some((
            tos.path.to_string(),
            (aline - tos.start - tos.offset + 1) as i32,
        ))
    }
}

/// The symbol table and line table of a program, organized into functions and objects.
pub struct Table<'a> {
    /// All symbols, in table order.
    pub syms: Vec<Sym>,
    /// All functions, sorted by entry address.
    pub funcs: Vec<Func<'a>>,
    /// Maps each source file name to the object that contains it.
    pub files: BTreeMap<String, ObjIndex>,
    /// All objects, in table order.
    pub objs: Vec<Obj>,
    /// The line table, if it is in the Go 1.2 format. It is shared by all functions.
    pub go12line: Option<Rc<LineTable<'a>>>,
}

impl<'a> Table<'a> {
    /// Builds a table from the contents of the symbol table section and a line table.
    ///
    /// `symtab` may be empty. Functions of the old line table format must appear in the symbol
    /// table in increasing address order.
    pub fn new(symtab: &'a [u8], pcln: LineTable<'a>) -> Result<Self, DecodingError> {
        let _span = trace_span!("Table::new").entered();

        let pcln = Rc::new(pcln);
        let go12line = if pcln.is_go12() {
            Some(pcln.clone())
        } else {
            None
        };

        let mut syms: Vec<Sym> = Vec::new();
        let mut fname: HashMap<u16, String> = HashMap::new();
        let mut num_funcs = 0;
        let mut num_objs = 0;
        let mut last_typ = SymType::default();

        for s in SymtabIter::new(symtab)? {
            let s = s?;
            let mut ts = Sym {
                value: s.value,
                typ: s.typ,
                name: String::new(),
                go_type: s.go_type,
                func: None,
            };

            if s.typ.is_path() {
                if !last_typ.is_path() {
                    num_objs += 1;
                }
                for elt in s.name.chunks_exact(2) {
                    let elt_index = u16::from_be_bytes([elt[0], elt[1]]);
                    let Some(elt_name) = fname.get(&elt_index) else {
                        return Err(DecodingError::BadFilenameCode(elt_index));
                    };
                    if !ts.name.is_empty() && !ts.name.ends_with('/') {
                        ts.name.push('/');
                    }
                    ts.name.push_str(elt_name);
                }
                trace!(path = %ts.name, value = ts.value, "path symbol");
            } else {
                ts.name = BStr::new(s.name).to_str_lossy().replace('·', ".");
            }

            if s.typ.is_func() {
                num_funcs += 1;
            } else if s.typ == SymType::FILE_NAME {
                fname.insert(s.value as u16, ts.name.clone());
            }

            last_typ = s.typ;
            syms.push(ts);
        }

        let mut t = Table {
            syms,
            funcs: Vec::new(),
            files: BTreeMap::new(),
            objs: Vec::new(),
            go12line,
        };

        let mut obj: Option<ObjIndex> = None;
        if let Some(go12) = pcln.go12() {
            t.objs.push(Obj::default());
            obj = Some(ObjIndex(0));
            go12.map_files(&mut t.files, ObjIndex(0))?;
        } else {
            t.objs.reserve(num_objs);
        }

        let mut last_f = 0;
        let mut cursor = pcln.clone();
        let mut i = 0;
        while i < t.syms.len() {
            let typ = t.syms[i].typ;

            if typ.is_path() {
                // Go 1.2 binaries have the file information elsewhere.
                if t.go12line.is_some() {
                    i += 1;
                    continue;
                }

                // Finish the current object, and start a new one.
                if let Some(o) = obj {
                    t.objs[o.0].funcs = last_f..t.funcs.len();
                }
                last_f = t.funcs.len();
                let o = ObjIndex(t.objs.len());
                obj = Some(o);

                let end = run_end(&t.syms, i + 1, |typ| !typ.is_path());
                t.objs.push(Obj {
                    paths: Some(i..end),
                    funcs: 0..0,
                });

                // Record the top-level file names.
                let mut depth = 0;
                for s in t.syms[i..end].iter() {
                    if s.name.is_empty() {
                        depth -= 1;
                    } else {
                        if depth == 0 {
                            t.files.insert(s.name.clone(), o);
                        }
                        depth += 1;
                    }
                }

                i = end;
                continue;
            }

            if typ.is_func() {
                if let Some(prev) = t.funcs.last_mut() {
                    prev.end = t.syms[i].value;
                }
                let name = t.syms[i].name.as_str();
                if name == "runtime.etext" || name == "etext" {
                    i += 1;
                    continue;
                }

                let end = run_end(&t.syms, i + 1, |typ| typ.is_func() || typ.is_path());
                let entry = t.syms[i].value;

                let line_table = if t.go12line.is_some() {
                    // All functions share the same line table.
                    pcln.clone()
                } else {
                    let sliced = Rc::new(cursor.slice(entry));
                    cursor = sliced.clone();
                    sliced
                };

                let mut func = Func {
                    sym: Sym::default(),
                    entry,
                    end: 0,
                    params: Vec::new(),
                    locals: Vec::new(),
                    frame_size: 0,
                    line_table: Some(line_table),
                    obj,
                };

                for s in t.syms[i + 1..end].iter() {
                    match s.typ {
                        SymType::FRAME_SIZE => func.frame_size = s.value,
                        SymType::PARAM => func.params.push(s.clone()),
                        SymType::AUTO => func.locals.push(s.clone()),
                        _ => {}
                    }
                }

                t.syms[i].func = Some(FuncIndex(t.funcs.len()));
                func.sym = t.syms[i].clone();
                t.funcs.push(func);

                i = end;
                continue;
            }

            i += 1;
        }

        if let Some(go12) = pcln.go12() {
            if num_funcs == 0 {
                info!(
                    nfunctab = go12.nfunctab,
                    "reading functions from the Go 1.2 line table"
                );
                t.funcs = go12.funcs(&pcln)?;
                for (index, func) in t.funcs.iter_mut().enumerate() {
                    func.sym.func = Some(FuncIndex(index));
                    func.obj = obj;
                }
            }
        }

        if let Some(o) = obj {
            t.objs[o.0].funcs = last_f..t.funcs.len();
        }

        Ok(t)
    }

    /// Returns the function containing `pc`.
    pub fn pc_to_func(&self, pc: u64) -> Option<&Func<'a>> {
        let i = self.funcs.partition_point(|f| f.entry <= pc);
        let func = &self.funcs[i.checked_sub(1)?];
        if func.contains(pc) { Some(func) } else { None }
    }

    /// Returns the file name, line number and function for `pc`.
    pub fn pc_to_line(&self, pc: u64) -> Option<(String, i32, &Func<'a>)> {
        let func = self.pc_to_func(pc)?;

        if let Some(go12line) = &self.go12line {
            let file = go12line.pc_to_file(pc)?;
            let line = go12line.pc_to_line(pc)?;
            return Some((file.to_string(), line, func));
        }

        let aline = func.line_table.as_ref()?.pc_to_line(pc)?;
        let obj = self.func_obj(func)?;
        let (file, line) = obj.line_from_aline(&self.syms, aline)?;
        Some((file, line, func))
    }

    /// Returns the text, data, or bss symbol with the given name.
    pub fn lookup_sym(&self, name: &str) -> Option<&Sym> {
        self.syms
            .iter()
            .find(|s| s.typ.is_addressed() && s.name == name)
    }

    /// Returns the text, data, or bss symbol at the given address.
    pub fn sym_by_addr(&self, addr: u64) -> Option<&Sym> {
        self.syms
            .iter()
            .find(|s| s.typ.is_addressed() && s.value == addr)
    }

    /// Returns the function with the given name.
    pub fn lookup_func(&self, name: &str) -> Option<&Func<'a>> {
        self.funcs.iter().find(|f| f.sym.name == name)
    }

    /// Returns the path symbols of an object. Empty for Go 1.2 and later binaries.
    pub fn obj_paths(&self, obj: ObjIndex) -> &[Sym] {
        match self.objs.get(obj.0).and_then(|o| o.paths.clone()) {
            Some(range) => &self.syms[range],
            None => &[],
        }
    }

    /// Returns the functions of an object.
    pub fn obj_funcs(&self, obj: ObjIndex) -> &[Func<'a>] {
        match self.objs.get(obj.0) {
            Some(o) => &self.funcs[o.funcs.clone()],
            None => &[],
        }
    }

    /// Returns the object that contains a function.
    pub fn func_obj(&self, func: &Func<'a>) -> Option<&Obj> {
        self.objs.get(func.obj?.0)
    }

    /// Returns the function started by a function entry symbol.
    pub fn sym_func(&self, sym: &Sym) -> Option<&Func<'a>> {
        self.funcs.get(sym.func?.0)
    }
}

/// Returns the index of the first symbol at or after `start` for which `stop` is true, or the
/// length of `syms`.
fn run_end(syms: &[Sym], start: usize, stop: impl Fn(SymType) -> bool) -> usize {
    syms[start..]
        .iter()
        .position(|s| stop(s.typ))
        .map_or(syms.len(), |n| start + n)
}
