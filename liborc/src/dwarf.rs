//! The DWARF reader: parses `__debug_abbrev` and `__debug_info`, materializes DIEs with their
//! attribute values decoded, and computes the two hashes everything downstream keys on - the
//! symbol-path identity hash and the fatal-attribute digest.
//!
//! Offsets within `__debug_info` are section-relative throughout (references arrive CU-relative
//! off the wire and are rebased immediately).

use crate::die::Arch;
use crate::die::Attribute;
use crate::die::AttributeSequence;
use crate::die::AttributeValue;
use crate::die::Die;
use crate::die::Dies;
use crate::die::ValueKind;
use crate::die::nonfatal_attribute;
use crate::die::registered_tag;
use crate::error::Context as _;
use crate::error::Result;
use crate::hash::new_hasher;
use crate::ofd::Ofd;
use crate::reader::Reader;
use crate::string_pool::PoolStr;
use crate::string_pool::empool;
use crate::bail;
use crate::ensure;
use gimli::DwAt;
use gimli::DwTag;
use gimli::constants::*;
use hashbrown::HashMap;
use object::Endianness;
use std::hash::Hasher;
use std::io::SeekFrom;
use std::rc::Rc;

/// Longest `pointer -> const -> typedef -> ...` chain we'll follow when resolving a type
/// reference to a printable name.
const MAX_TYPE_CHAIN: usize = 16;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Extent {
    /// Absolute file offset of the section's first byte.
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// File locations of the `__debug_*` sections. The last three are bookkeeping only: every
/// attribute that refers into them is nonfatal or carried by a passover form, so the reader
/// records where they are but never dereferences them.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SectionTable {
    pub(crate) info: Option<Extent>,
    pub(crate) abbrev: Option<Extent>,
    pub(crate) debug_str: Option<Extent>,
    pub(crate) str_offsets: Option<Extent>,
    pub(crate) line_str: Option<Extent>,
    pub(crate) line: Option<Extent>,
    pub(crate) loc: Option<Extent>,
    pub(crate) ranges: Option<Extent>,
}

/// One compilation unit header. All offsets are relative to the top of `__debug_info`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CuHeader {
    pub(crate) offset: u64,
    pub(crate) end: u64,
    pub(crate) version: u16,
    pub(crate) abbrev_offset: u64,
    pub(crate) address_size: u8,
    pub(crate) dies_start: u64,

    /// DWARF 5 allows unit kinds other than compile/partial units in `__debug_info`; those are
    /// enumerated but not materialized.
    pub(crate) skip: bool,
}

struct AbbrevAttr {
    at: DwAt,
    form: DwForm,
    implicit_const: i64,
}

struct Abbrev {
    tag: DwTag,
    has_children: bool,
    attributes: Vec<AbbrevAttr>,
}

/// Scans the CU headers of `__debug_info` without touching any DIEs.
pub(crate) fn enumerate_cus(
    s: &mut Reader,
    sections: &SectionTable,
    e: Endianness,
) -> Result<Vec<CuHeader>> {
    let info = sections.info.context("no __debug_info section")?;
    let mut cus = Vec::new();
    let mut offset = 0_u64;
    while offset + 4 <= info.size {
        s.seek(SeekFrom::Start(info.offset + offset));
        let cu = read_cu_header(s, e, offset, &info)?;
        ensure!(
            cu.end > offset && cu.end <= info.size,
            "CU at {offset:#x} extends past the end of __debug_info"
        );
        cus.push(cu);
        offset = cu.end;
    }
    Ok(cus)
}

fn read_cu_header(s: &mut Reader, e: Endianness, offset: u64, info: &Extent) -> Result<CuHeader> {
    let length = s.read_u32(e)?;
    ensure!(length != 0xffff_ffff, "DWARF64 is not supported");
    let end = offset + 4 + u64::from(length);

    let version = s.read_u16(e)?;
    ensure!(
        (2..=5).contains(&version),
        "unsupported DWARF version {version} in CU at {offset:#x}"
    );

    let mut skip = false;
    let abbrev_offset;
    let address_size;
    if version >= 5 {
        let unit_type = DwUt(s.read_u8()?);
        skip = !matches!(unit_type, DW_UT_compile | DW_UT_partial);
        address_size = s.read_u8()?;
        abbrev_offset = u64::from(s.read_u32(e)?);
    } else {
        abbrev_offset = u64::from(s.read_u32(e)?);
        address_size = s.read_u8()?;
    }

    Ok(CuHeader {
        offset,
        end,
        version,
        abbrev_offset,
        address_size,
        dies_start: s.tell() - info.offset,
        skip,
    })
}

fn read_abbrevs(
    s: &mut Reader,
    sections: &SectionTable,
    abbrev_offset: u64,
) -> Result<HashMap<u64, Abbrev>> {
    let extent = sections.abbrev.context("no __debug_abbrev section")?;
    ensure!(
        abbrev_offset < extent.size,
        "abbreviation table offset {abbrev_offset:#x} is outside __debug_abbrev"
    );
    s.seek(SeekFrom::Start(extent.offset + abbrev_offset));

    let mut declarations = HashMap::new();
    loop {
        let code = s.read_uleb128()?;
        if code == 0 {
            return Ok(declarations);
        }
        let tag = DwTag(s.read_uleb128()? as u16);
        let has_children = s.read_u8()? != 0;
        let mut attributes = Vec::new();
        loop {
            let at = s.read_uleb128()?;
            let form = DwForm(s.read_uleb128()? as u16);
            if at == 0 && form.0 == 0 {
                break;
            }
            let implicit_const = if form == DW_FORM_implicit_const {
                s.read_sleb128()?
            } else {
                0
            };
            attributes.push(AbbrevAttr {
                at: DwAt(at as u16),
                form,
                implicit_const,
            });
        }
        declarations.insert(
            code,
            Abbrev {
                tag,
                has_children,
                attributes,
            },
        );
    }
}

struct CuParser<'a> {
    s: &'a mut Reader,
    e: Endianness,
    sections: &'a SectionTable,
    info: Extent,
    cu: CuHeader,
    abbrevs: Rc<HashMap<u64, Abbrev>>,

    /// Offset of the first string-offset entry within `__debug_str_offs`, set from
    /// `DW_AT_str_offsets_base` when seen. Until then, the size of the version 5 table header -
    /// the right answer for the single-contribution layout Clang emits.
    str_offsets_base: u64,

    /// Memoized `resolve_type_name` results, keyed by section-relative DIE offset.
    resolved_types: HashMap<u64, Option<PoolStr>>,
}

impl<'a> CuParser<'a> {
    fn new(
        s: &'a mut Reader,
        sections: &'a SectionTable,
        e: Endianness,
        cu: CuHeader,
    ) -> Result<CuParser<'a>> {
        let info = sections.info.context("no __debug_info section")?;
        let abbrevs = Rc::new(read_abbrevs(s, sections, cu.abbrev_offset)?);
        Ok(CuParser {
            s,
            e,
            sections,
            info,
            cu,
            abbrevs,
            str_offsets_base: 8,
            resolved_types: HashMap::new(),
        })
    }

    /// Walks the CU's DIE tree, producing the batch handed to the registry.
    fn materialize(&mut self, arch: Arch, ofd_index: u32) -> Result<Dies> {
        let cu_end = self.info.offset + self.cu.end;
        self.s
            .seek(SeekFrom::Start(self.info.offset + self.cu.dies_start));

        let mut dies = Dies::new();
        let mut prefix = b"::[u]".to_vec();
        let mut scope_lens: Vec<usize> = Vec::new();
        let mut anon_namespace_depth: Option<usize> = None;
        let abbrevs = Rc::clone(&self.abbrevs);

        while self.s.tell() < cu_end {
            let die_offset = (self.s.tell() - self.info.offset) as u32;
            let code = self.s.read_uleb128()?;
            if code == 0 {
                // End of a sibling list.
                if let Some(len) = scope_lens.pop() {
                    prefix.truncate(len);
                }
                if anon_namespace_depth.is_some_and(|depth| scope_lens.len() < depth) {
                    anon_namespace_depth = None;
                }
                continue;
            }

            let abbrev = abbrevs.get(&code).with_context(|| {
                format!("bad abbreviation code {code} for DIE at {die_offset:#x}")
            })?;
            let mut attributes = self.read_attributes(abbrev)?;
            self.resolve_references(&mut attributes, die_offset)?;

            let is_unit_root =
                matches!(abbrev.tag, DW_TAG_compile_unit | DW_TAG_partial_unit);
            let identifier = if is_unit_root {
                PoolStr::default()
            } else {
                attributes
                    .string(DW_AT_linkage_name)
                    .or_else(|| attributes.string(DW_AT_MIPS_linkage_name))
                    .or_else(|| attributes.string(DW_AT_name))
                    .unwrap_or_default()
            };

            let path = if identifier.is_empty() {
                empool(&prefix)
            } else {
                let mut buffer = Vec::with_capacity(prefix.len() + 2 + identifier.view().len());
                buffer.extend_from_slice(&prefix);
                buffer.extend_from_slice(b"::");
                buffer.extend_from_slice(identifier.view());
                empool(&buffer)
            };

            let skippable = is_skippable(
                abbrev.tag,
                &attributes,
                identifier.is_empty(),
                anon_namespace_depth.is_some(),
            );

            dies.push(Die::new(
                path,
                fatal_attribute_hash(&attributes),
                ofd_index,
                die_offset,
                abbrev.tag,
                arch,
                abbrev.has_children,
                skippable,
            ));

            if abbrev.has_children {
                scope_lens.push(prefix.len());
                if !identifier.is_empty() {
                    prefix.extend_from_slice(b"::");
                    prefix.extend_from_slice(identifier.view());
                }
                if anon_namespace_depth.is_none()
                    && abbrev.tag == DW_TAG_namespace
                    && identifier.is_empty()
                {
                    // Anonymous namespace: internal linkage, exempt from the ODR. Everything
                    // beneath it stays out of the registry.
                    anon_namespace_depth = Some(scope_lens.len());
                }
            }
        }

        Ok(dies)
    }

    /// Re-reads a single DIE's attribute sequence, for report construction.
    fn fetch_at(&mut self, die_offset: u32) -> Result<(DwTag, bool, AttributeSequence)> {
        self.s
            .seek(SeekFrom::Start(self.info.offset + u64::from(die_offset)));
        let code = self.s.read_uleb128()?;
        ensure!(code != 0, "no DIE at {die_offset:#x}");
        let abbrevs = Rc::clone(&self.abbrevs);
        let abbrev = abbrevs
            .get(&code)
            .with_context(|| format!("bad abbreviation code {code} for DIE at {die_offset:#x}"))?;
        let mut attributes = self.read_attributes(abbrev)?;
        self.resolve_references(&mut attributes, die_offset)?;
        Ok((abbrev.tag, abbrev.has_children, attributes))
    }

    fn read_attributes(&mut self, abbrev: &Abbrev) -> Result<AttributeSequence> {
        let mut attributes = AttributeSequence::with_capacity(abbrev.attributes.len());
        for declared in &abbrev.attributes {
            let value = self.read_form_value(declared.form, declared.implicit_const)?;
            if declared.at == DW_AT_str_offsets_base && value.has(ValueKind::UINT) {
                self.str_offsets_base = value.uint();
            }
            attributes.push(Attribute {
                name: declared.at,
                form: declared.form,
                value,
            });
        }
        Ok(attributes)
    }

    fn read_form_value(&mut self, form: DwForm, implicit_const: i64) -> Result<AttributeValue> {
        let e = self.e;
        let mut value = AttributeValue::default();
        match form {
            DW_FORM_addr => {
                let x = if self.cu.address_size == 8 {
                    self.s.read_u64(e)?
                } else {
                    u64::from(self.s.read_u32(e)?)
                };
                value.set_uint(x);
            }
            DW_FORM_data1 => value.set_uint(self.s.read_u8()?.into()),
            DW_FORM_data2 => value.set_uint(self.s.read_u16(e)?.into()),
            DW_FORM_data4 => value.set_uint(self.s.read_u32(e)?.into()),
            DW_FORM_data8 => value.set_uint(self.s.read_u64(e)?),
            DW_FORM_udata => {
                let x = self.s.read_uleb128()?;
                value.set_uint(x);
            }
            DW_FORM_sdata => {
                let x = self.s.read_sleb128()?;
                value.set_sint(x);
            }
            DW_FORM_implicit_const => value.set_sint(implicit_const),
            DW_FORM_flag => value.set_uint(self.s.read_u8()?.into()),
            DW_FORM_flag_present => value.set_uint(1),
            DW_FORM_string => {
                let bytes = self.s.read_c_str()?;
                let string = empool(bytes);
                value.set_string(string);
            }
            DW_FORM_strp => {
                let offset = self.s.read_u32(e)?;
                let string =
                    self.read_section_str(self.sections.debug_str, offset.into(), "__debug_str")?;
                value.set_string(string);
            }
            DW_FORM_line_strp => {
                let offset = self.s.read_u32(e)?;
                let string = self.read_section_str(
                    self.sections.line_str,
                    offset.into(),
                    "__debug_line_str",
                )?;
                value.set_string(string);
            }
            DW_FORM_strx => {
                let index = self.s.read_uleb128()?;
                value.set_string(self.read_strx(index)?);
            }
            DW_FORM_strx1 => {
                let index = self.s.read_u8()?;
                value.set_string(self.read_strx(index.into())?);
            }
            DW_FORM_strx2 => {
                let index = self.s.read_u16(e)?;
                value.set_string(self.read_strx(index.into())?);
            }
            DW_FORM_strx3 => {
                let index = read_u24(self.s, e)?;
                value.set_string(self.read_strx(index.into())?);
            }
            DW_FORM_strx4 => {
                let index = self.s.read_u32(e)?;
                value.set_string(self.read_strx(index.into())?);
            }
            DW_FORM_ref1 => {
                let raw = self.s.read_u8()?;
                value.set_reference(self.cu.offset + u64::from(raw));
            }
            DW_FORM_ref2 => {
                let raw = self.s.read_u16(e)?;
                value.set_reference(self.cu.offset + u64::from(raw));
            }
            DW_FORM_ref4 => {
                let raw = self.s.read_u32(e)?;
                value.set_reference(self.cu.offset + u64::from(raw));
            }
            DW_FORM_ref8 => {
                let raw = self.s.read_u64(e)?;
                value.set_reference(self.cu.offset + raw);
            }
            DW_FORM_ref_udata => {
                let raw = self.s.read_uleb128()?;
                value.set_reference(self.cu.offset + raw);
            }
            DW_FORM_ref_addr => {
                // Already relative to the top of __debug_info (32-bit offset size).
                let raw = self.s.read_u32(e)?;
                value.set_reference(raw.into());
            }
            DW_FORM_ref_sig8 => {
                // Type signatures are content hashes, stable across object files.
                value.set_uint(self.s.read_u64(e)?);
            }
            DW_FORM_sec_offset => value.set_uint(self.s.read_u32(e)?.into()),
            DW_FORM_exprloc | DW_FORM_block => {
                let n = self.s.read_uleb128()?;
                self.skip_passover(&mut value, n)?;
            }
            DW_FORM_block1 => {
                let n = self.s.read_u8()?;
                self.skip_passover(&mut value, n.into())?;
            }
            DW_FORM_block2 => {
                let n = self.s.read_u16(e)?;
                self.skip_passover(&mut value, n.into())?;
            }
            DW_FORM_block4 => {
                let n = self.s.read_u32(e)?;
                self.skip_passover(&mut value, n.into())?;
            }
            DW_FORM_data16 => self.skip_passover(&mut value, 16)?,
            DW_FORM_addrx | DW_FORM_loclistx | DW_FORM_rnglistx => {
                let index = self.s.read_uleb128()?;
                value.set_uint(index);
            }
            DW_FORM_addrx1 => value.set_uint(self.s.read_u8()?.into()),
            DW_FORM_addrx2 => value.set_uint(self.s.read_u16(e)?.into()),
            DW_FORM_addrx3 => value.set_uint(read_u24(self.s, e)?.into()),
            DW_FORM_addrx4 => value.set_uint(self.s.read_u32(e)?.into()),
            DW_FORM_strp_sup | DW_FORM_ref_sup4 => self.skip_passover(&mut value, 4)?,
            DW_FORM_ref_sup8 => self.skip_passover(&mut value, 8)?,
            DW_FORM_indirect => {
                let actual = DwForm(self.s.read_uleb128()? as u16);
                return self.read_form_value(actual, implicit_const);
            }
            _ => bail!("unsupported DWARF form {form} at {:#x}", self.s.tell()),
        }
        Ok(value)
    }

    fn skip_passover(&mut self, value: &mut AttributeValue, n: u64) -> Result {
        self.s.read_bytes(n as usize)?;
        value.set_passover();
        Ok(())
    }

    fn read_section_str(
        &mut self,
        extent: Option<Extent>,
        offset: u64,
        section_name: &str,
    ) -> Result<PoolStr> {
        let extent =
            extent.with_context(|| format!("string form without a {section_name} section"))?;
        ensure!(
            offset < extent.size,
            "string offset {offset:#x} is outside {section_name}"
        );
        self.s
            .with_temp_seek(extent.offset + offset, |s| Ok(empool(s.read_c_str()?)))
    }

    fn read_strx(&mut self, index: u64) -> Result<PoolStr> {
        let table = self
            .sections
            .str_offsets
            .context("indexed string form without a __debug_str_offs section")?;
        let e = self.e;
        let position = self.str_offsets_base + index * 4;
        ensure!(
            position + 4 <= table.size,
            "string index {index} is outside __debug_str_offs"
        );
        let offset = self
            .s
            .with_temp_seek(table.offset + position, |s| s.read_u32(e))?;
        self.read_section_str(self.sections.debug_str, offset.into(), "__debug_str")
    }

    /// Post-processes reference attributes: marks back-references to DIEs this CU has already
    /// materialized, and resolves type chains to a printable name so that equality and hashing
    /// can compare definitions rather than section-local offsets.
    fn resolve_references(
        &mut self,
        attributes: &mut AttributeSequence,
        die_offset: u32,
    ) -> Result {
        for attribute in attributes.iter_mut() {
            if nonfatal_attribute(attribute.name) || !attribute.value.has(ValueKind::REFERENCE) {
                continue;
            }
            let target = attribute.value.reference();
            if !(self.cu.dies_start..self.cu.end).contains(&target) {
                // Cross-CU reference; leave it as an offset.
                continue;
            }
            if target < u64::from(die_offset) {
                attribute.value.set_die();
            }
            if let Some(name) = self.resolve_type_name(target, 0)? {
                attribute.value.set_string(name);
            }
        }
        Ok(())
    }

    fn resolve_type_name(&mut self, target: u64, depth: usize) -> Result<Option<PoolStr>> {
        if depth > MAX_TYPE_CHAIN {
            return Ok(None);
        }
        if let Some(&cached) = self.resolved_types.get(&target) {
            return Ok(cached);
        }

        let saved = self.s.tell();
        self.s.seek(SeekFrom::Start(self.info.offset + target));
        let resolved = self.resolve_type_name_here(depth);
        self.s.seek(SeekFrom::Start(saved));

        let resolved = resolved?;
        self.resolved_types.insert(target, resolved);
        Ok(resolved)
    }

    fn resolve_type_name_here(&mut self, depth: usize) -> Result<Option<PoolStr>> {
        let code = self.s.read_uleb128()?;
        if code == 0 {
            return Ok(None);
        }
        let abbrevs = Rc::clone(&self.abbrevs);
        let Some(abbrev) = abbrevs.get(&code) else {
            return Ok(None);
        };
        let attributes = self.read_attributes(abbrev)?;
        let name = attributes.string(DW_AT_name);

        let referent = attributes
            .get(DW_AT_type)
            .filter(|a| a.value.has(ValueKind::REFERENCE))
            .map(|a| a.value.reference())
            .filter(|target| (self.cu.dies_start..self.cu.end).contains(target));

        let decoration = match abbrev.tag {
            DW_TAG_pointer_type => Decoration::Suffix(b"*"),
            DW_TAG_reference_type => Decoration::Suffix(b"&"),
            DW_TAG_rvalue_reference_type => Decoration::Suffix(b"&&"),
            DW_TAG_array_type => Decoration::Suffix(b"[]"),
            DW_TAG_const_type => Decoration::Prefix(b"const "),
            DW_TAG_volatile_type => Decoration::Prefix(b"volatile "),
            DW_TAG_restrict_type => Decoration::Prefix(b"restrict "),
            _ => return Ok(name),
        };

        let base = match referent {
            Some(target) => self.resolve_type_name(target, depth + 1)?,
            None => None,
        };
        let base = match &base {
            Some(name) => name.view(),
            // A pointer or qualifier with no referent is the void case.
            None => b"void".as_slice(),
        };

        let mut buffer = Vec::with_capacity(base.len() + 8);
        match decoration {
            Decoration::Prefix(prefix) => {
                buffer.extend_from_slice(prefix);
                buffer.extend_from_slice(base);
            }
            Decoration::Suffix(suffix) => {
                buffer.extend_from_slice(base);
                buffer.extend_from_slice(suffix);
            }
        }
        Ok(Some(empool(&buffer)))
    }
}

enum Decoration {
    Prefix(&'static [u8]),
    Suffix(&'static [u8]),
}

fn read_u24(s: &mut Reader, e: Endianness) -> Result<u32> {
    let bytes = s.read_bytes(3)?;
    Ok(match e {
        Endianness::Little => {
            u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16
        }
        Endianness::Big => {
            u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2])
        }
    })
}

/// Whether this DIE is filtered out of registration.
fn is_skippable(
    tag: DwTag,
    attributes: &AttributeSequence,
    anonymous: bool,
    in_anonymous_namespace: bool,
) -> bool {
    if in_anonymous_namespace || anonymous {
        return true;
    }
    if !registered_tag(tag) {
        return true;
    }
    // Declarations aren't definitions; compiler-generated entities have no source definition to
    // disagree about.
    if attributes.flag(DW_AT_declaration) || attributes.flag(DW_AT_artificial) {
        return true;
    }
    // A subprogram with neither a linkage name nor external linkage is local to its TU.
    if tag == DW_TAG_subprogram
        && !attributes.has(DW_AT_linkage_name)
        && !attributes.has(DW_AT_MIPS_linkage_name)
        && !attributes.flag(DW_AT_external)
    {
        return true;
    }
    false
}

/// Digest over the ordered `(attribute, normalized value)` pairs of every ODR-fatal attribute.
/// Strings hash their content hash; resolved references therefore hash the referent's name, and
/// only unresolvable references fall back to their raw form and offset.
fn fatal_attribute_hash(attributes: &AttributeSequence) -> u64 {
    let mut h = new_hasher();
    for attribute in attributes.iter() {
        if nonfatal_attribute(attribute.name) {
            continue;
        }
        h.write_u16(attribute.name.0);
        let value = &attribute.value;
        if value.has(ValueKind::STRING) {
            h.write_u8(1);
            h.write_u64(value.string_hash());
        } else if value.has(ValueKind::UINT) {
            h.write_u8(2);
            h.write_u64(value.uint());
        } else if value.has(ValueKind::SINT) {
            h.write_u8(3);
            h.write_i64(value.sint());
        } else if value.has(ValueKind::REFERENCE) {
            h.write_u8(4);
            h.write_u16(attribute.form.0);
            h.write_u64(value.reference());
        } else {
            h.write_u8(5);
            h.write_u8(value.kind().bits());
        }
    }
    h.finish()
}

/// Materializes one CU into a registrable batch.
pub(crate) fn process_cu(
    s: &mut Reader,
    sections: &SectionTable,
    e: Endianness,
    arch: Arch,
    ofd_index: u32,
    cu: CuHeader,
) -> Result<Dies> {
    CuParser::new(s, sections, e, cu)?.materialize(arch, ofd_index)
}

/// Re-reads the full attribute sequence of a registered DIE from its object file. Used by
/// report construction, which needs actual attributes rather than the digest.
pub(crate) fn fetch_one_die(
    ofd: &Ofd,
    debug_info_offset: u32,
) -> Result<(DwTag, bool, AttributeSequence)> {
    let mut s = Reader::open(&ofd.path)?;
    let e = ofd.endian;
    let target = u64::from(debug_info_offset);
    let cu = enumerate_cus(&mut s, &ofd.sections, e)?
        .into_iter()
        .find(|cu| cu.offset <= target && target < cu.end)
        .with_context(|| format!("no CU contains the DIE at {target:#x}"))?;
    CuParser::new(&mut s, &ofd.sections, e, cu)?.fetch_at(debug_info_offset)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reader::tests::write_temp_file;

    /// Minimal DWARF 4 test image: an abbreviation table, a string table, and one CU containing
    /// `struct S` with members, mirroring what Clang emits for a small C++ TU.
    pub(crate) struct TestCu {
        pub(crate) debug_abbrev: Vec<u8>,
        pub(crate) debug_info: Vec<u8>,
        pub(crate) debug_str: Vec<u8>,
        strings: Vec<(Vec<u8>, u32)>,
    }

    pub(crate) const ABBREV_COMPILE_UNIT: u8 = 1;
    pub(crate) const ABBREV_STRUCT: u8 = 2;
    pub(crate) const ABBREV_MEMBER: u8 = 3;
    pub(crate) const ABBREV_BASE_TYPE: u8 = 4;

    impl TestCu {
        pub(crate) fn new() -> TestCu {
            let mut debug_abbrev = Vec::new();
            // compile_unit, has children: producer, name.
            debug_abbrev.extend([ABBREV_COMPILE_UNIT, 0x11, 0x01]);
            debug_abbrev.extend([0x25, 0x0e, 0x03, 0x0e, 0x00, 0x00]);
            // structure_type, has children: name, byte_size, decl_file, decl_line.
            debug_abbrev.extend([ABBREV_STRUCT, 0x13, 0x01]);
            debug_abbrev.extend([0x03, 0x0e, 0x0b, 0x0b, 0x3a, 0x0b, 0x3b, 0x0b, 0x00, 0x00]);
            // member: name, type (ref4), data_member_location, decl_file, decl_line.
            debug_abbrev.extend([ABBREV_MEMBER, 0x0d, 0x00]);
            debug_abbrev.extend([
                0x03, 0x0e, 0x49, 0x13, 0x38, 0x0b, 0x3a, 0x0b, 0x3b, 0x0b, 0x00, 0x00,
            ]);
            // base_type: name, encoding, byte_size.
            debug_abbrev.extend([ABBREV_BASE_TYPE, 0x24, 0x00]);
            debug_abbrev.extend([0x03, 0x0e, 0x3e, 0x0b, 0x0b, 0x0b, 0x00, 0x00]);
            debug_abbrev.push(0x00);

            let mut cu = TestCu {
                debug_abbrev,
                debug_info: Vec::new(),
                debug_str: Vec::new(),
                strings: Vec::new(),
            };
            // Placeholder CU header; the length is patched in finish().
            cu.debug_info.extend(0_u32.to_le_bytes());
            cu.debug_info.extend(4_u16.to_le_bytes());
            cu.debug_info.extend(0_u32.to_le_bytes());
            cu.debug_info.push(8);
            cu
        }

        pub(crate) fn str_offset(&mut self, string: &[u8]) -> u32 {
            if let Some((_, offset)) = self.strings.iter().find(|(s, _)| s == string) {
                return *offset;
            }
            let offset = self.debug_str.len() as u32;
            self.debug_str.extend(string);
            self.debug_str.push(0);
            self.strings.push((string.to_vec(), offset));
            offset
        }

        pub(crate) fn die_offset(&self) -> u32 {
            self.debug_info.len() as u32
        }

        pub(crate) fn compile_unit(&mut self, producer: &[u8], name: &[u8]) {
            let producer = self.str_offset(producer);
            let name = self.str_offset(name);
            self.debug_info.push(ABBREV_COMPILE_UNIT);
            self.debug_info.extend(producer.to_le_bytes());
            self.debug_info.extend(name.to_le_bytes());
        }

        pub(crate) fn structure(&mut self, name: &[u8], byte_size: u8, decl_line: u8) -> u32 {
            let offset = self.die_offset();
            let name = self.str_offset(name);
            self.debug_info.push(ABBREV_STRUCT);
            self.debug_info.extend(name.to_le_bytes());
            self.debug_info.extend([byte_size, 1, decl_line]);
            offset
        }

        /// Emits a member whose `type` reference is patched later via `set_ref`.
        pub(crate) fn member(&mut self, name: &[u8], location: u8, decl_line: u8) -> usize {
            let name = self.str_offset(name);
            self.debug_info.push(ABBREV_MEMBER);
            self.debug_info.extend(name.to_le_bytes());
            let patch = self.debug_info.len();
            self.debug_info.extend(0_u32.to_le_bytes());
            self.debug_info.extend([location, 1, decl_line]);
            patch
        }

        pub(crate) fn base_type(&mut self, name: &[u8], encoding: u8, byte_size: u8) -> u32 {
            let offset = self.die_offset();
            let name = self.str_offset(name);
            self.debug_info.push(ABBREV_BASE_TYPE);
            self.debug_info.extend(name.to_le_bytes());
            self.debug_info.extend([encoding, byte_size]);
            offset
        }

        pub(crate) fn end_children(&mut self) {
            self.debug_info.push(0);
        }

        pub(crate) fn set_ref(&mut self, patch: usize, die_offset: u32) {
            self.debug_info[patch..patch + 4].copy_from_slice(&die_offset.to_le_bytes());
        }

        pub(crate) fn finish(&mut self) {
            let length = (self.debug_info.len() - 4) as u32;
            self.debug_info[0..4].copy_from_slice(&length.to_le_bytes());
        }
    }

    /// `struct S { int x; };` compiled into the test image.
    pub(crate) fn simple_struct_cu(member_type: &[u8], byte_size: u8) -> TestCu {
        let mut cu = TestCu::new();
        cu.compile_unit(b"test producer", b"a.cpp");
        cu.structure(b"S", byte_size, 1);
        let member = cu.member(b"x", 0, 1);
        cu.end_children();
        let int_type = cu.base_type(member_type, 0x05, byte_size);
        cu.set_ref(member, int_type);
        cu.end_children();
        cu.finish();
        cu
    }

    fn layout(cu: &TestCu) -> (Vec<u8>, SectionTable) {
        let mut file = Vec::new();
        let info_offset = file.len() as u64;
        file.extend(&cu.debug_info);
        let abbrev_offset = file.len() as u64;
        file.extend(&cu.debug_abbrev);
        let str_offset = file.len() as u64;
        file.extend(&cu.debug_str);
        let sections = SectionTable {
            info: Some(Extent {
                offset: info_offset,
                size: cu.debug_info.len() as u64,
            }),
            abbrev: Some(Extent {
                offset: abbrev_offset,
                size: cu.debug_abbrev.len() as u64,
            }),
            debug_str: Some(Extent {
                offset: str_offset,
                size: cu.debug_str.len() as u64,
            }),
            ..Default::default()
        };
        (file, sections)
    }

    fn materialize(cu: &TestCu) -> Dies {
        let (file, sections) = layout(cu);
        let path = write_temp_file("dwarf", &file);
        let mut s = Reader::open(&path).unwrap();
        let cus = enumerate_cus(&mut s, &sections, Endianness::Little).unwrap();
        assert_eq!(cus.len(), 1);
        process_cu(
            &mut s,
            &sections,
            Endianness::Little,
            Arch::X86_64,
            0,
            cus[0],
        )
        .unwrap()
    }

    #[test]
    fn test_cu_header_enumeration() {
        let cu = simple_struct_cu(b"int", 4);
        let (file, sections) = layout(&cu);
        let path = write_temp_file("dwarf-cus", &file);
        let mut s = Reader::open(&path).unwrap();
        let cus = enumerate_cus(&mut s, &sections, Endianness::Little).unwrap();
        assert_eq!(cus.len(), 1);
        assert_eq!(cus[0].offset, 0);
        assert_eq!(cus[0].version, 4);
        assert_eq!(cus[0].address_size, 8);
        assert_eq!(cus[0].dies_start, 11);
        assert_eq!(cus[0].end, cu.debug_info.len() as u64);
    }

    #[test]
    fn test_materializes_paths_and_flags() {
        let dies = materialize(&simple_struct_cu(b"int", 4));
        assert_eq!(dies.len(), 4);

        assert_eq!(dies[0].path.view(), b"::[u]");
        assert!(dies[0].skippable);

        assert_eq!(dies[1].path.view(), b"::[u]::S");
        assert!(!dies[1].skippable);
        assert_eq!(dies[1].tag, DW_TAG_structure_type);
        assert!(dies[1].has_children);
        assert_eq!(dies[1].hash, crate::hash::hash_bytes(b"::[u]::S"));

        assert_eq!(dies[2].path.view(), b"::[u]::S::x");
        assert!(!dies[2].skippable);
        assert_eq!(dies[2].tag, DW_TAG_member);

        // Base types are not ODR entities.
        assert_eq!(dies[3].path.view(), b"::[u]::int");
        assert!(dies[3].skippable);
    }

    #[test]
    fn test_fatal_hash_ignores_source_coordinates() {
        let mut line_one = TestCu::new();
        line_one.compile_unit(b"p", b"a.cpp");
        line_one.structure(b"S", 4, 1);
        line_one.end_children();
        line_one.end_children();
        line_one.finish();

        let mut line_nine = TestCu::new();
        line_nine.compile_unit(b"p", b"b.cpp");
        line_nine.structure(b"S", 4, 9);
        line_nine.end_children();
        line_nine.end_children();
        line_nine.finish();

        let a = materialize(&line_one);
        let b = materialize(&line_nine);
        assert_eq!(a[1].fatal_attribute_hash, b[1].fatal_attribute_hash);
    }

    #[test]
    fn test_fatal_hash_sees_member_type_through_reference() {
        let a = materialize(&simple_struct_cu(b"int", 4));
        let b = materialize(&simple_struct_cu(b"long", 4));
        // Same layout, same offsets; only the referent's name differs. The member's type
        // reference resolves to the name, so the digests must differ.
        assert_ne!(a[2].fatal_attribute_hash, b[2].fatal_attribute_hash);
    }

    #[test]
    fn test_forward_reference_resolves() {
        // Members reference base types that are emitted after them; materialization still
        // resolves the name.
        let cu = simple_struct_cu(b"int", 4);
        let (file, sections) = layout(&cu);
        let path = write_temp_file("dwarf-fwd", &file);
        let mut s = Reader::open(&path).unwrap();
        let cus = enumerate_cus(&mut s, &sections, Endianness::Little).unwrap();
        let mut parser = CuParser::new(&mut s, &sections, Endianness::Little, cus[0]).unwrap();
        // The member DIE sits at 28: an 11-byte CU header, a 9-byte unit root, an 8-byte
        // structure DIE.
        let (tag, _, attributes) = parser.fetch_at(28).unwrap();
        assert_eq!(tag, DW_TAG_member);
        let type_attribute = attributes.get(DW_AT_type).unwrap();
        assert!(type_attribute.value.has(ValueKind::STRING));
        assert_eq!(type_attribute.value.string().view(), b"int");
    }

    #[test]
    fn test_bad_abbrev_code_is_an_error() {
        let mut cu = simple_struct_cu(b"int", 4);
        // Overwrite the struct DIE's abbreviation code with one that was never declared.
        cu.debug_info[20] = 0x7f;
        let (file, sections) = layout(&cu);
        let path = write_temp_file("dwarf-bad-code", &file);
        let mut s = Reader::open(&path).unwrap();
        let cus = enumerate_cus(&mut s, &sections, Endianness::Little).unwrap();
        assert!(
            process_cu(
                &mut s,
                &sections,
                Endianness::Little,
                Arch::X86_64,
                0,
                cus[0],
            )
            .is_err()
        );
    }

    #[test]
    fn test_dwarf64_is_rejected() {
        let mut info = 0xffff_ffff_u32.to_le_bytes().to_vec();
        info.extend([0; 16]);
        let path = write_temp_file("dwarf64", &info);
        let mut s = Reader::open(&path).unwrap();
        let sections = SectionTable {
            info: Some(Extent {
                offset: 0,
                size: info.len() as u64,
            }),
            ..Default::default()
        };
        assert!(enumerate_cus(&mut s, &sections, Endianness::Little).is_err());
    }
}
