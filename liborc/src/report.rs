//! ODRV report construction and rendering: bucketing a conflicting chain by unique definition,
//! naming the attribute the definitions disagree about, and printing the result.

use crate::die::AttributeSequence;
use crate::die::Die;
use crate::die::ValueKind;
use crate::die::at_name;
use crate::die::nonfatal_attribute;
use crate::die::tag_name;
use crate::dwarf;
use crate::error::Result;
use crate::ofd;
use crate::string_pool::PoolStr;
use gimli::DwAt;
use gimli::constants::DW_AT_null;
use gimli::constants::DW_AT_type;
use std::borrow::Cow;
use std::collections::BTreeMap;

pub struct OdrvReport {
    symbol: &'static [u8],

    /// Head of the (sorted) chain; `conflict` is set on it before construction.
    head: &'static Die,

    /// One entry per unique definition, keyed by fatal-attribute hash so iteration order is
    /// deterministic.
    conflict_map: BTreeMap<u64, ConflictEntry>,

    /// The first attribute found to disagree between the first and last unique definitions.
    name: DwAt,
}

struct ConflictEntry {
    die: &'static Die,
    attributes: AttributeSequence,
}

impl OdrvReport {
    pub(crate) fn new(symbol: &'static [u8], head: &'static Die) -> Result<OdrvReport> {
        debug_assert!(head.conflict());

        let mut conflict_map = BTreeMap::new();
        for die in head.chain() {
            if conflict_map.contains_key(&die.fatal_attribute_hash) {
                continue;
            }
            let attributes = fetch_attributes_for_die(die)?;
            conflict_map.insert(die.fatal_attribute_hash, ConflictEntry { die, attributes });
        }
        assert!(conflict_map.len() > 1);

        // Derive the category from the first and last unique definitions.
        let front = conflict_map.first_key_value().unwrap().1;
        let back = conflict_map.last_key_value().unwrap().1;
        let name = find_attribute_conflict(&front.attributes, &back.attributes);

        Ok(OdrvReport {
            symbol,
            head,
            conflict_map,
            name,
        })
    }

    /// E.g. `structure_type:byte_size`.
    pub fn category(&self) -> String {
        let front = self.conflict_map.first_key_value().unwrap().1;
        format!("{}:{}", tag_name(front.die.tag), at_name(self.name))
    }

    pub fn symbol(&self) -> Cow<'static, str> {
        String::from_utf8_lossy(self.symbol)
    }

    pub(crate) fn symbol_bytes(&self) -> &'static [u8] {
        self.symbol
    }

    /// How many distinct definitions the chain decomposed into.
    pub fn definition_count(&self) -> usize {
        self.conflict_map.len()
    }

    /// Total chain length, including DIEs that agree with one another.
    pub fn chain_length(&self) -> usize {
        self.head.chain().count()
    }

    pub fn display(&self, graceful: bool) -> impl std::fmt::Display + '_ {
        ReportDisplay {
            report: self,
            prefix: if graceful { "warning" } else { "error" },
        }
    }
}

struct ReportDisplay<'a> {
    report: &'a OdrvReport,
    prefix: &'static str,
}

impl std::fmt::Display for ReportDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let report = self.report;
        writeln!(
            f,
            "{}: ODRV ({}); conflict in `{}`",
            self.prefix,
            report.category(),
            demangle(report.symbol)
        )?;
        for entry in report.conflict_map.values() {
            let die = entry.die;
            writeln!(
                f,
                "    {} @ {:#010x} ({})",
                ofd::ancestry(die.ofd_index),
                die.debug_info_offset,
                tag_name(die.tag)
            )?;
            for attribute in entry.attributes.iter() {
                writeln!(f, "        {attribute}")?;
            }
        }
        writeln!(f)
    }
}

fn fetch_attributes_for_die(die: &Die) -> Result<AttributeSequence> {
    let ofd = ofd::get(die.ofd_index);
    let (tag, has_children, attributes) = dwarf::fetch_one_die(ofd, die.debug_info_offset)?;
    debug_assert_eq!(tag, die.tag);
    debug_assert_eq!(has_children, die.has_children);
    debug_assert_eq!(ofd.arch, die.arch);
    Ok(attributes)
}

/// Strips the `::[u]::` prefix off a symbol path. Paths shorter than the prefix are top-level
/// compilation units, which have no symbol.
pub(crate) fn path_to_symbol(path: PoolStr) -> &'static [u8] {
    let view = path.view();
    if view.len() < 7 { b"" } else { &view[7..] }
}

pub(crate) fn demangle(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    symbolic_demangle::demangle(&raw).into_owned()
}

/// Returns the first fatal attribute on which `x` and `y` disagree: present in one but not the
/// other, or present in both with inequivalent values. `DW_AT_null` means they're "the same".
pub(crate) fn find_attribute_conflict(
    x: &AttributeSequence,
    y: &AttributeSequence,
) -> DwAt {
    for xattr in x.iter() {
        let name = xattr.name;
        if nonfatal_attribute(name) {
            continue;
        }
        let Some(yattr) = y.get(name) else {
            return name;
        };
        if name == DW_AT_type && type_equivalent(xattr, yattr) {
            continue;
        }
        if xattr == yattr {
            continue;
        }
        return name;
    }

    // Flag any fatal attributes that exist in y but not in x.
    for yattr in y.iter() {
        let name = yattr.name;
        if nonfatal_attribute(name) {
            continue;
        }
        if x.get(name).is_none() {
            return name;
        }
    }

    DW_AT_null
}

/// Types are convoluted enough that their comparison is pulled out here. Two type attributes
/// agree if they resolve to the same reference or to the same name string.
fn type_equivalent(x: &crate::die::Attribute, y: &crate::die::Attribute) -> bool {
    if x.value.has(ValueKind::REFERENCE)
        && y.value.has(ValueKind::REFERENCE)
        && x.value.reference() == y.value.reference()
    {
        return true;
    }

    if x.value.has(ValueKind::STRING)
        && y.value.has(ValueKind::STRING)
        && x.value.string_hash() == y.value.string_hash()
    {
        return true;
    }

    false
}

/// Decides whether a report survives the caller's category filters. Deliberately not applied
/// inside `process`: the core returns everything and the caller filters.
pub fn filter_report(
    report: &OdrvReport,
    violation_ignore: &[String],
    violation_report: &[String],
) -> bool {
    let category = report.category();
    if !violation_ignore.is_empty() {
        // Report everything except the stuff on the ignore list.
        violation_ignore.binary_search(&category).is_err()
    } else if !violation_report.is_empty() {
        // Report nothing except the stuff on the report list.
        violation_report.binary_search(&category).is_ok()
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::die::Attribute;
    use crate::die::AttributeValue;
    use crate::string_pool::empool;
    use gimli::constants::*;

    fn uint_attribute(name: DwAt, x: u64) -> Attribute {
        let mut value = AttributeValue::default();
        value.set_uint(x);
        Attribute {
            name,
            form: DW_FORM_data1,
            value,
        }
    }

    fn type_attribute(offset: u64, name: Option<&[u8]>) -> Attribute {
        let mut value = AttributeValue::default();
        value.set_reference(offset);
        if let Some(name) = name {
            value.set_string(empool(name));
        }
        Attribute {
            name: DW_AT_type,
            form: DW_FORM_ref4,
            value,
        }
    }

    fn string_attribute(name: DwAt, s: &[u8]) -> Attribute {
        let mut value = AttributeValue::default();
        value.set_string(empool(s));
        Attribute {
            name,
            form: DW_FORM_strp,
            value,
        }
    }

    #[test]
    fn test_equivalent_sequences_have_no_conflict() {
        let mut x = AttributeSequence::default();
        x.push(string_attribute(DW_AT_name, b"S"));
        x.push(uint_attribute(DW_AT_byte_size, 4));
        x.push(uint_attribute(DW_AT_decl_line, 1));

        let mut y = AttributeSequence::default();
        y.push(string_attribute(DW_AT_name, b"S"));
        y.push(uint_attribute(DW_AT_byte_size, 4));
        // Source coordinates are nonfatal and may differ freely.
        y.push(uint_attribute(DW_AT_decl_line, 99));

        assert_eq!(find_attribute_conflict(&x, &y), DW_AT_null);
    }

    #[test]
    fn test_first_differing_fatal_attribute_wins() {
        let mut x = AttributeSequence::default();
        x.push(string_attribute(DW_AT_name, b"S"));
        x.push(uint_attribute(DW_AT_byte_size, 4));

        let mut y = AttributeSequence::default();
        y.push(string_attribute(DW_AT_name, b"S"));
        y.push(uint_attribute(DW_AT_byte_size, 8));

        assert_eq!(find_attribute_conflict(&x, &y), DW_AT_byte_size);
    }

    #[test]
    fn test_attribute_missing_from_either_side_is_a_conflict() {
        let mut x = AttributeSequence::default();
        x.push(string_attribute(DW_AT_name, b"S"));
        x.push(uint_attribute(DW_AT_byte_size, 4));

        let mut y = AttributeSequence::default();
        y.push(string_attribute(DW_AT_name, b"S"));

        assert_eq!(find_attribute_conflict(&x, &y), DW_AT_byte_size);
        assert_eq!(find_attribute_conflict(&y, &x), DW_AT_byte_size);
    }

    #[test]
    fn test_type_equivalence_relaxation() {
        let mut x = AttributeSequence::default();
        x.push(type_attribute(0x40, Some(b"int")));
        let mut y = AttributeSequence::default();
        // Different offset, same resolved name: equivalent.
        y.push(type_attribute(0x90, Some(b"int")));
        assert_eq!(find_attribute_conflict(&x, &y), DW_AT_null);

        let mut z = AttributeSequence::default();
        z.push(type_attribute(0x40, Some(b"long")));
        assert_eq!(find_attribute_conflict(&x, &z), DW_AT_type);

        // Unresolved on both sides but equal offsets: equivalent.
        let mut p = AttributeSequence::default();
        p.push(type_attribute(0x40, None));
        let mut q = AttributeSequence::default();
        q.push(type_attribute(0x40, None));
        assert_eq!(find_attribute_conflict(&p, &q), DW_AT_null);
    }

    #[test]
    fn test_path_to_symbol() {
        assert_eq!(path_to_symbol(empool(b"::[u]::S::x")), b"S::x");
        assert_eq!(path_to_symbol(empool(b"::[u]")), b"");
    }

    #[test]
    fn test_demangle_passes_plain_names_through() {
        assert_eq!(demangle(b"S"), "S");
        assert_eq!(demangle(b"_ZN2ns3fooEv"), "ns::foo()");
    }
}
