// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parses and validates sample schema XML documents, following
//! `hdds/src/dds/qos/loaders/fastdds.rs`'s `roxmltree` usage.
//!
//! Grounded on `original_source/src/data_format_parser.cpp` and
//! `original_source/test/data_format_tests.cpp`: a version tag longer than
//! 7 characters, a negative `size`/`offset`, a missing `name`/`type`
//! attribute, or a `<format>` with no `<item>` children are all rejected.

use super::format::{DataFormat, DataItem};
use crate::error::LagerError;
use roxmltree::Document;
use std::fs;
use std::path::Path;

const MAX_VERSION_LEN: usize = 7;

pub fn parse_from_file<P: AsRef<Path>>(path: P) -> Result<DataFormat, LagerError> {
    let xml = fs::read_to_string(path)?;
    parse_from_string(&xml)
}

pub fn parse_from_string(xml: &str) -> Result<DataFormat, LagerError> {
    let doc = Document::parse(xml)
        .map_err(|e| LagerError::SchemaError(format!("failed to parse XML: {e}")))?;

    let root = doc.root_element();
    if root.tag_name().name() != "format" {
        return Err(LagerError::SchemaError(
            "root element must be <format>".to_string(),
        ));
    }

    let version = root
        .attribute("version")
        .ok_or_else(|| LagerError::SchemaError("<format> missing version attribute".to_string()))?;
    if version.len() > MAX_VERSION_LEN {
        return Err(LagerError::SchemaError(format!(
            "version \"{version}\" exceeds the {MAX_VERSION_LEN}-character limit"
        )));
    }

    let mut format = DataFormat::new(version);
    for node in root.children().filter(|n| n.is_element() && n.tag_name().name() == "item") {
        let name = required_attr(&node, "name")?;
        let type_name = required_attr(&node, "type")?;
        let size = parse_non_negative(&node, "size")?;
        let offset = parse_non_negative(&node, "offset")?;
        format.add_item(DataItem::new(name, type_name, size, offset));
    }

    if format.items.is_empty() {
        return Err(LagerError::SchemaError(
            "<format> must contain at least one <item>".to_string(),
        ));
    }

    Ok(format)
}

fn required_attr(node: &roxmltree::Node, name: &str) -> Result<String, LagerError> {
    node.attribute(name)
        .map(str::to_string)
        .ok_or_else(|| LagerError::SchemaError(format!("<item> missing {name} attribute")))
}

/// Parses an `<item>` attribute as a signed integer first so a negative
/// value is rejected with a clear error, rather than silently wrapping when
/// narrowed straight to `u32`.
fn parse_non_negative(node: &roxmltree::Node, attr: &str) -> Result<u32, LagerError> {
    let raw = node
        .attribute(attr)
        .ok_or_else(|| LagerError::SchemaError(format!("<item> missing {attr} attribute")))?;
    let signed: i64 = raw
        .parse()
        .map_err(|_| LagerError::SchemaError(format!("<item> {attr}=\"{raw}\" is not an integer")))?;
    u32::try_from(signed)
        .map_err(|_| LagerError::SchemaError(format!("<item> {attr}=\"{raw}\" must not be negative")))
}

/// Builds a `DataFormat` from `(name, type, size)` triples, computing each
/// item's offset as the running sum of the items before it — the Rust
/// analogue of the reference client's `createFromDataRefItems`, which
/// infers offsets from a list of typed variable references instead.
pub fn create_from_items(version: &str, items: &[(String, String, u32)]) -> DataFormat {
    let mut format = DataFormat::new(version);
    let mut offset = 0u32;
    for (name, type_name, size) in items {
        format.add_item(DataItem::new(name.clone(), type_name.clone(), *size, offset));
        offset += size;
    }
    format
}

/// Reports whether `xml` parses as a well-formed schema with exactly
/// `expected_item_count` items.
pub fn is_valid(xml: &str, expected_item_count: usize) -> bool {
    match parse_from_string(xml) {
        Ok(format) => format.items.len() == expected_item_count,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<format version="BEERR01">
<item name="column1" type="string" size="255" offset="0"/>
<item name="column2" type="integer" size="4" offset="255"/>
</format>"#;

    #[test]
    fn parses_a_good_format() {
        let format = parse_from_string(GOOD).unwrap();
        assert_eq!(format.version, "BEERR01");
        assert_eq!(format.items.len(), 2);
        assert_eq!(format.items[0].name, "column1");
        assert_eq!(format.items[1].offset, 255);
    }

    #[test]
    fn rejects_version_string_too_long() {
        let xml = GOOD.replace("BEERR01", "123456789");
        assert!(parse_from_string(&xml).is_err());
    }

    #[test]
    fn rejects_negative_offset() {
        let xml = GOOD.replace(r#"offset="0""#, r#"offset="-1""#);
        assert!(parse_from_string(&xml).is_err());
    }

    #[test]
    fn rejects_negative_size() {
        let xml = GOOD.replace(r#"size="255""#, r#"size="-1""#);
        assert!(parse_from_string(&xml).is_err());
    }

    #[test]
    fn rejects_format_with_no_items() {
        let xml = r#"<format version="EMPTY01"></format>"#;
        assert!(parse_from_string(xml).is_err());
    }

    #[test]
    fn rejects_item_missing_name() {
        let xml = r#"<format version="V"><item type="string" size="1" offset="0"/></format>"#;
        assert!(parse_from_string(xml).is_err());
    }

    #[test]
    fn is_valid_checks_item_count() {
        assert!(is_valid(GOOD, 2));
        assert!(!is_valid(GOOD, 3));
        assert!(!is_valid("not xml", 0));
    }

    #[test]
    fn create_from_items_computes_cumulative_offsets() {
        let format = create_from_items(
            "test",
            &[
                ("int1".to_string(), "integer".to_string(), 4),
                ("int2".to_string(), "integer".to_string(), 4),
            ],
        );
        assert_eq!(format.items[0].offset, 0);
        assert_eq!(format.items[1].offset, 4);
    }
}
