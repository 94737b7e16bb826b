//! C-compatible function table for arbor.
//!
//! Hosts call [`arbor_api`] once and go through the returned [`ArborApi`]
//! for everything else. Only plain data crosses the boundary: byte pointers
//! with lengths, [`ArborBuffer`] for bytes handed back to the host, and
//! opaque handles that must be released with the matching `free_*` entry.

#![warn(unsafe_op_in_unsafe_fn)]

use std::ptr;
use std::slice;
use tracing::warn;

use arbor::{Edit, Language, Parser, SyntaxTree};

/// Version of the [`ArborApi`] layout. Bumped on any incompatible change.
pub const ABI_VERSION: u32 = 1;

/// Bytes owned by arbor. Release with `free_buffer`.
#[repr(C)]
#[derive(Debug)]
pub struct ArborBuffer {
    /// Start of the bytes; null for an empty buffer.
    pub data: *mut u8,
    /// Number of bytes.
    pub len: usize,
}

impl ArborBuffer {
    fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
        }
    }

    fn from_vec(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        Self {
            data: Box::into_raw(boxed).cast::<u8>(),
            len,
        }
    }
}

/// One byte-range replacement, as in [`arbor::Edit`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArborEdit {
    /// First changed byte.
    pub start: u32,
    /// End of the replaced range before the edit.
    pub old_end: u32,
    /// End of the replacement after the edit.
    pub new_end: u32,
}

impl From<ArborEdit> for Edit {
    fn from(edit: ArborEdit) -> Self {
        Edit {
            start: edit.start.into(),
            old_end: edit.old_end.into(),
            new_end: edit.new_end.into(),
        }
    }
}

/// Outcome of `compile`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArborStatus {
    /// Success.
    Ok = 0,
    /// A null pointer or non-UTF-8 text was passed.
    InvalidArgument = 1,
    /// The grammar was rejected; the error buffer holds the message.
    GrammarError = 2,
}

/// Opaque handle to a loaded language.
#[derive(Debug)]
pub struct ArborLanguage(Language);

/// Opaque handle to a syntax tree.
#[derive(Debug)]
pub struct ArborTree(SyntaxTree);

/// The function table.
#[repr(C)]
#[derive(Debug)]
pub struct ArborApi {
    /// Equal to [`ABI_VERSION`].
    pub abi_version: u32,
    /// Compiles grammar JSON into a blob, or an error message.
    pub compile: unsafe extern "C" fn(
        grammar: *const u8,
        len: usize,
        blob: *mut ArborBuffer,
        error: *mut ArborBuffer,
    ) -> ArborStatus,
    /// Loads a blob; null on failure, with the message in `error`.
    pub load: unsafe extern "C" fn(blob: *const u8, len: usize, error: *mut ArborBuffer) -> *mut ArborLanguage,
    /// Parses UTF-8 text; null on invalid arguments.
    pub parse: unsafe extern "C" fn(
        language: *const ArborLanguage,
        text: *const u8,
        len: usize,
    ) -> *mut ArborTree,
    /// Reparses UTF-8 text against an older tree and the edits since.
    pub reparse: unsafe extern "C" fn(
        language: *const ArborLanguage,
        text: *const u8,
        len: usize,
        old: *const ArborTree,
        edits: *const ArborEdit,
        edit_count: usize,
    ) -> *mut ArborTree,
    /// The tree as an S-expression.
    pub tree_sexp: unsafe extern "C" fn(tree: *const ArborTree) -> ArborBuffer,
    /// Whether the tree contains `ERROR` nodes.
    pub tree_has_error: unsafe extern "C" fn(tree: *const ArborTree) -> bool,
    /// Releases a language handle. Trees parsed with it stay valid.
    pub free_language: unsafe extern "C" fn(language: *mut ArborLanguage),
    /// Releases a tree.
    pub free_tree: unsafe extern "C" fn(tree: *mut ArborTree),
    /// Releases a buffer returned by arbor.
    pub free_buffer: unsafe extern "C" fn(buffer: ArborBuffer),
}

static API: ArborApi = ArborApi {
    abi_version: ABI_VERSION,
    compile,
    load,
    parse,
    reparse,
    tree_sexp,
    tree_has_error,
    free_language,
    free_tree,
    free_buffer,
};

/// The function table. The pointer is valid for the life of the program.
#[no_mangle]
#[must_use]
pub extern "C" fn arbor_api() -> *const ArborApi {
    &API
}

/// # Safety
///
/// `data` must be null or point at `len` readable bytes.
unsafe fn bytes<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if data.is_null() {
        return (len == 0).then_some(&[][..]);
    }
    Some(unsafe { slice::from_raw_parts(data, len) })
}

/// # Safety
///
/// As for [`bytes`].
unsafe fn text<'a>(data: *const u8, len: usize) -> Option<&'a str> {
    let bytes = unsafe { bytes(data, len) }?;
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "text is not valid UTF-8");
            None
        }
    }
}

/// # Safety
///
/// `out` must be null or valid for writes.
unsafe fn write_out(out: *mut ArborBuffer, buffer: ArborBuffer) {
    if out.is_null() {
        unsafe { free_buffer(buffer) };
    } else {
        unsafe { out.write(buffer) };
    }
}

unsafe extern "C" fn compile(
    grammar: *const u8,
    len: usize,
    blob: *mut ArborBuffer,
    error: *mut ArborBuffer,
) -> ArborStatus {
    let Some(json) = (unsafe { text(grammar, len) }) else {
        return ArborStatus::InvalidArgument;
    };
    if blob.is_null() {
        return ArborStatus::InvalidArgument;
    }
    match arbor::compile_json(json) {
        Ok(compiled) => {
            unsafe { write_out(blob, ArborBuffer::from_vec(compiled.to_bytes())) };
            ArborStatus::Ok
        }
        Err(e) => {
            unsafe { write_out(error, ArborBuffer::from_vec(e.to_string().into_bytes())) };
            ArborStatus::GrammarError
        }
    }
}

unsafe extern "C" fn load(blob: *const u8, len: usize, error: *mut ArborBuffer) -> *mut ArborLanguage {
    let Some(bytes) = (unsafe { bytes(blob, len) }) else {
        return ptr::null_mut();
    };
    match arbor::load(bytes) {
        Ok(language) => Box::into_raw(Box::new(ArborLanguage(language))),
        Err(e) => {
            unsafe { write_out(error, ArborBuffer::from_vec(e.to_string().into_bytes())) };
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn parse(language: *const ArborLanguage, text: *const u8, len: usize) -> *mut ArborTree {
    unsafe { reparse(language, text, len, ptr::null(), ptr::null(), 0) }
}

unsafe extern "C" fn reparse(
    language: *const ArborLanguage,
    text: *const u8,
    len: usize,
    old: *const ArborTree,
    edits: *const ArborEdit,
    edit_count: usize,
) -> *mut ArborTree {
    let Some(language) = (unsafe { language.as_ref() }) else {
        return ptr::null_mut();
    };
    let Some(source) = (unsafe { self::text(text, len) }) else {
        return ptr::null_mut();
    };
    let mut parser = Parser::new(language.0.clone());
    let tree = match unsafe { old.as_ref() } {
        Some(old) => {
            let edits: Vec<Edit> = if edits.is_null() {
                Vec::new()
            } else {
                unsafe { slice::from_raw_parts(edits, edit_count) }
                    .iter()
                    .copied()
                    .map(Edit::from)
                    .collect()
            };
            parser.reparse(source, &old.0, &edits)
        }
        None => parser.parse(source),
    };
    tree.map_or(ptr::null_mut(), |tree| Box::into_raw(Box::new(ArborTree(tree))))
}

unsafe extern "C" fn tree_sexp(tree: *const ArborTree) -> ArborBuffer {
    match unsafe { tree.as_ref() } {
        Some(tree) => ArborBuffer::from_vec(tree.0.to_sexp().into_bytes()),
        None => ArborBuffer::empty(),
    }
}

unsafe extern "C" fn tree_has_error(tree: *const ArborTree) -> bool {
    unsafe { tree.as_ref() }.is_some_and(|tree| tree.0.has_error())
}

unsafe extern "C" fn free_language(language: *mut ArborLanguage) {
    if !language.is_null() {
        drop(unsafe { Box::from_raw(language) });
    }
}

unsafe extern "C" fn free_tree(tree: *mut ArborTree) {
    if !tree.is_null() {
        drop(unsafe { Box::from_raw(tree) });
    }
}

unsafe extern "C" fn free_buffer(buffer: ArborBuffer) {
    if !buffer.data.is_null() {
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(buffer.data, buffer.len)) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAMMAR: &str = r#"{
        "name": "sum",
        "rules": {
            "expr": {
                "type": "SEQ",
                "members": [
                    {"type": "SYMBOL", "name": "number"},
                    {"type": "REPEAT", "content": {
                        "type": "SEQ",
                        "members": [
                            {"type": "STRING", "value": "+"},
                            {"type": "SYMBOL", "name": "number"}
                        ]
                    }}
                ]
            },
            "number": {"type": "PATTERN", "value": "\\d+"}
        },
        "extras": [{"type": "PATTERN", "value": "\\s"}]
    }"#;

    fn buffer_text(buffer: &ArborBuffer) -> String {
        let bytes = unsafe { slice::from_raw_parts(buffer.data, buffer.len) };
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_round_trip_through_the_table() {
        let api = unsafe { &*arbor_api() };
        assert_eq!(api.abi_version, ABI_VERSION);

        let mut blob = ArborBuffer::empty();
        let mut error = ArborBuffer::empty();
        let status = unsafe { (api.compile)(GRAMMAR.as_ptr(), GRAMMAR.len(), &mut blob, &mut error) };
        assert_eq!(status, ArborStatus::Ok);

        let language = unsafe { (api.load)(blob.data, blob.len, &mut error) };
        assert!(!language.is_null());
        unsafe { (api.free_buffer)(blob) };

        let text = "1+2";
        let tree = unsafe { (api.parse)(language, text.as_ptr(), text.len()) };
        let sexp = unsafe { (api.tree_sexp)(tree) };
        assert_eq!(buffer_text(&sexp), "(expr (number) (number))");
        unsafe { (api.free_buffer)(sexp) };

        let edited = "1+2+3";
        let edit = ArborEdit {
            start: 3,
            old_end: 3,
            new_end: 5,
        };
        let newer = unsafe { (api.reparse)(language, edited.as_ptr(), edited.len(), tree, &edit, 1) };
        assert!(!unsafe { (api.tree_has_error)(newer) });
        let sexp = unsafe { (api.tree_sexp)(newer) };
        assert_eq!(buffer_text(&sexp), "(expr (number) (number) (number))");

        unsafe {
            (api.free_buffer)(sexp);
            (api.free_tree)(tree);
            (api.free_tree)(newer);
            (api.free_language)(language);
        }
    }

    #[test]
    fn test_errors_are_reported() {
        let api = unsafe { &*arbor_api() };
        let mut error = ArborBuffer::empty();
        let language = unsafe { (api.load)(b"junk".as_ptr(), 4, &mut error) };
        assert!(language.is_null());
        assert!(buffer_text(&error).contains("magic"));
        unsafe { (api.free_buffer)(error) };

        let mut blob = ArborBuffer::empty();
        let mut error = ArborBuffer::empty();
        let bad = "{";
        let status = unsafe { (api.compile)(bad.as_ptr(), bad.len(), &mut blob, &mut error) };
        assert_eq!(status, ArborStatus::GrammarError);
        assert!(!buffer_text(&error).is_empty());
        unsafe { (api.free_buffer)(error) };

        let tree = unsafe { (api.parse)(ptr::null(), ptr::null(), 0) };
        assert!(tree.is_null());
    }
}
