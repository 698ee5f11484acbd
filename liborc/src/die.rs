//! The core data model: attribute values, attributes, and the DIE record that the registry and
//! the enforcement pass operate on.
//!
//! A DIE is constructed by reading an abbreviation declaration, then filling in the declaration's
//! attribute values with data taken from `__debug_info`. More than one DIE can use the same
//! abbreviation; each "stamping" reads its values from a different place in the section.

use crate::string_pool::PoolStr;
use bitflags::bitflags;
use crossbeam_utils::atomic::AtomicCell;
use gimli::DwAt;
use gimli::DwTag;
use gimli::constants::*;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arch {
    Unknown,
    X86,
    X86_64,
    Arm,
    Arm64,
    Arm64_32,
}

impl Arch {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "i386",
            Arch::X86_64 => "x86_64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::Arm64_32 => "arm64_32",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.name(), f)
    }
}

/// The containment path of an object, outermost container first, e.g. `libfoo.a` then `foo.o`.
/// Ordering is lexicographic by element view, which gives enforcement its deterministic chain
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Ancestry(SmallVec<[PoolStr; 5]>);

impl Ancestry {
    pub(crate) fn push(&mut self, ancestor: PoolStr) {
        debug_assert!(self.0.len() < self.0.inline_size());
        self.0.push(ancestor);
    }
}

impl std::fmt::Display for Ancestry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, ancestor) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            std::fmt::Display::fmt(ancestor, f)?;
        }
        Ok(())
    }
}

bitflags! {
    /// The interpretations a single attribute value admits. Intentionally not a disjoint sum:
    /// plenty of DWARF data supports more than one reading at once - a reference often also
    /// resolves to the referent's name string, and we want both around.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ValueKind: u8 {
        const PASSOVER = 1 << 0;
        const UINT = 1 << 1;
        const SINT = 1 << 2;
        const STRING = 1 << 3;
        const REFERENCE = 1 << 4;
        const DIE = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct AttributeValue {
    kind: ValueKind,
    uint: u64,
    int: i64,
    string: PoolStr,
}

impl Default for AttributeValue {
    fn default() -> Self {
        AttributeValue {
            kind: ValueKind::empty(),
            uint: 0,
            int: 0,
            string: PoolStr::default(),
        }
    }
}

impl AttributeValue {
    pub(crate) fn kind(&self) -> ValueKind {
        self.kind
    }

    pub(crate) fn has(&self, kind: ValueKind) -> bool {
        self.kind.intersects(kind)
    }

    pub(crate) fn set_passover(&mut self) {
        self.kind = ValueKind::PASSOVER;
    }

    pub(crate) fn set_uint(&mut self, x: u64) {
        self.kind |= ValueKind::UINT;
        self.uint = x;
    }

    pub(crate) fn set_sint(&mut self, x: i64) {
        self.kind |= ValueKind::SINT;
        self.int = x;
    }

    pub(crate) fn set_string(&mut self, x: PoolStr) {
        self.kind |= ValueKind::STRING;
        self.string = x;
    }

    /// `offset` is relative to the top of the owning `__debug_info` section.
    pub(crate) fn set_reference(&mut self, offset: u64) {
        self.kind |= ValueKind::REFERENCE;
        self.uint = offset;
    }

    /// Marks the value as backed by an already-materialized DIE of the same CU.
    pub(crate) fn set_die(&mut self) {
        self.kind |= ValueKind::DIE;
    }

    pub(crate) fn uint(&self) -> u64 {
        debug_assert!(self.has(ValueKind::UINT));
        self.uint
    }

    pub(crate) fn sint(&self) -> i64 {
        debug_assert!(self.has(ValueKind::SINT));
        self.int
    }

    pub(crate) fn string(&self) -> PoolStr {
        debug_assert!(self.has(ValueKind::STRING));
        self.string
    }

    pub(crate) fn string_hash(&self) -> u64 {
        self.string().hash()
    }

    pub(crate) fn reference(&self) -> u64 {
        debug_assert!(self.has(ValueKind::REFERENCE));
        self.uint
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        // Strings first: references and DIEs that resolve to a string should be compared by it.
        if self.has(ValueKind::STRING) && other.has(ValueKind::STRING) {
            return self.string == other.string;
        }
        if self.has(ValueKind::UINT) && other.has(ValueKind::UINT) {
            return self.uint == other.uint;
        }
        if self.has(ValueKind::SINT) && other.has(ValueKind::SINT) {
            return self.int == other.int;
        }

        // References are not compared by offset: offsets are local to a particular
        // `__debug_info` block that the two DIEs may not share.
        self.kind == other.kind
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has(ValueKind::STRING) {
            write!(f, "{}", self.string)
        } else if self.has(ValueKind::UINT) {
            write!(f, "{}", self.uint)
        } else if self.has(ValueKind::SINT) {
            write!(f, "{}", self.int)
        } else if self.has(ValueKind::REFERENCE) {
            write!(f, "ref {:#010x}", self.uint)
        } else if self.has(ValueKind::PASSOVER) {
            f.write_str("<skipped>")
        } else {
            f.write_str("<none>")
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
pub(crate) struct Attribute {
    pub(crate) name: DwAt,
    pub(crate) form: DwForm,
    pub(crate) value: AttributeValue,
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", at_name(self.name), self.value)
    }
}

/// The attributes of one DIE, in section order. Name uniqueness is not enforced; lookups return
/// the first match.
#[derive(Default)]
pub(crate) struct AttributeSequence {
    attributes: Vec<Attribute>,
}

impl AttributeSequence {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        AttributeSequence {
            attributes: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub(crate) fn get(&self, name: DwAt) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub(crate) fn has(&self, name: DwAt) -> bool {
        self.get(name).is_some()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Attribute> {
        self.attributes.iter_mut()
    }

    pub(crate) fn string(&self, name: DwAt) -> Option<PoolStr> {
        let attribute = self.get(name)?;
        attribute
            .value
            .has(ValueKind::STRING)
            .then(|| attribute.value.string())
    }

    pub(crate) fn flag(&self, name: DwAt) -> bool {
        self.get(name)
            .is_some_and(|a| a.value.has(ValueKind::UINT) && a.value.uint() != 0)
    }
}

/// One materialized definition. Sized for the millions: everything here is a word or less apart
/// from the chain link and path handle.
pub(crate) struct Die {
    /// Fully qualified symbol path, e.g. `::[u]::ns::Foo::bar`.
    pub(crate) path: PoolStr,

    /// Link to the next DIE sharing this symbol hash. Written during registration and again when
    /// enforcement re-links the chain in sorted order.
    next: AtomicCell<Option<&'static Die>>,

    /// Identity of the symbol: the content hash of `path`.
    pub(crate) hash: u64,

    /// Digest over every ODR-fatal attribute of this DIE.
    pub(crate) fatal_attribute_hash: u64,

    /// Index into the object-file-descriptor registry.
    pub(crate) ofd_index: u32,

    /// Offset of this DIE relative to the top of the owning `__debug_info` section.
    pub(crate) debug_info_offset: u32,

    pub(crate) tag: DwTag,
    pub(crate) arch: Arch,
    pub(crate) has_children: bool,

    /// Filtered out during materialization (declaration, no linkage, uninteresting tag, ...).
    /// Skippable DIEs are never registered.
    pub(crate) skippable: bool,

    conflict: AtomicBool,
}

pub(crate) type Dies = Vec<Die>;

impl Die {
    pub(crate) fn new(
        path: PoolStr,
        fatal_attribute_hash: u64,
        ofd_index: u32,
        debug_info_offset: u32,
        tag: DwTag,
        arch: Arch,
        has_children: bool,
        skippable: bool,
    ) -> Die {
        Die {
            path,
            next: AtomicCell::new(None),
            hash: path.hash(),
            fatal_attribute_hash,
            ofd_index,
            debug_info_offset,
            tag,
            arch,
            has_children,
            skippable,
            conflict: AtomicBool::new(false),
        }
    }

    pub(crate) fn next(&self) -> Option<&'static Die> {
        self.next.load()
    }

    pub(crate) fn set_next(&self, next: Option<&'static Die>) {
        self.next.store(next);
    }

    pub(crate) fn conflict(&self) -> bool {
        self.conflict.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_conflict(&self) {
        self.conflict.store(true, Ordering::Relaxed);
    }

    /// The chain starting at this DIE, in link order.
    pub(crate) fn chain(&'static self) -> impl Iterator<Item = &'static Die> {
        std::iter::successors(Some(self), |die| die.next())
    }
}

/// Attributes whose disagreement does not constitute an ODR violation: source coordinates,
/// producer strings, section plumbing, addresses, and everything in vendor space.
pub(crate) fn nonfatal_attribute(at: DwAt) -> bool {
    at.0 >= DW_AT_lo_user.0
        || matches!(
            at,
            DW_AT_decl_file
                | DW_AT_decl_line
                | DW_AT_decl_column
                | DW_AT_call_file
                | DW_AT_call_line
                | DW_AT_call_column
                | DW_AT_sibling
                | DW_AT_specification
                | DW_AT_producer
                | DW_AT_comp_dir
                | DW_AT_stmt_list
                | DW_AT_macro_info
                | DW_AT_macros
                | DW_AT_str_offsets_base
                | DW_AT_addr_base
                | DW_AT_rnglists_base
                | DW_AT_loclists_base
                | DW_AT_ranges
                | DW_AT_low_pc
                | DW_AT_high_pc
                | DW_AT_entry_pc
                | DW_AT_frame_base
                | DW_AT_location
        )
}

/// Tags that name entities the One Definition Rule applies to. Everything else is skippable at
/// materialization time.
pub(crate) fn registered_tag(tag: DwTag) -> bool {
    matches!(
        tag,
        DW_TAG_class_type
            | DW_TAG_structure_type
            | DW_TAG_union_type
            | DW_TAG_enumeration_type
            | DW_TAG_typedef
            | DW_TAG_subprogram
            | DW_TAG_member
    )
}

pub(crate) fn tag_name(tag: DwTag) -> Cow<'static, str> {
    match tag.static_string() {
        Some(name) => Cow::Borrowed(name.strip_prefix("DW_TAG_").unwrap_or(name)),
        None => Cow::Owned(format!("{:#06x}", tag.0)),
    }
}

pub(crate) fn at_name(at: DwAt) -> Cow<'static, str> {
    if at == DW_AT_null {
        return Cow::Borrowed("none");
    }
    match at.static_string() {
        Some(name) => Cow::Borrowed(name.strip_prefix("DW_AT_").unwrap_or(name)),
        None => Cow::Owned(format!("{:#06x}", at.0)),
    }
}
