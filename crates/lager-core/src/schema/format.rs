// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `DataFormat`/`DataItem`: the parsed shape of a sample schema document.

use std::fmt;

/// One field of a sample's fixed binary layout.
///
/// `size` is the field's width in bytes (the wire format restricts this to
/// 1, 2, 4, or 8 — see `sample.rs`) and `offset` is its byte offset within
/// the sample's data frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub name: String,
    pub type_name: String,
    pub size: u32,
    pub offset: u32,
}

impl DataItem {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, size: u32, offset: u32) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            size,
            offset,
        }
    }
}

/// A parsed sample schema: a version tag plus an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFormat {
    pub version: String,
    pub items: Vec<DataItem>,
}

impl DataFormat {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            items: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: DataItem) {
        self.items.push(item);
    }
}

/// `version: {version}\n{name} {type}\n...`, matching the reference
/// implementation's `operator<<` byte-for-byte so logs and test fixtures
/// written against it stay comparable.
impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version: {}", self.version)?;
        for item in &self.items {
            writeln!(f, "{} {}", item.name, item.type_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_reference_format() {
        let mut fmt = DataFormat::new("BEERR01");
        fmt.add_item(DataItem::new("column1", "string", 255, 0));
        fmt.add_item(DataItem::new("column2", "integer", 4, 255));
        assert_eq!(fmt.to_string(), "version: BEERR01\ncolumn1 string\ncolumn2 integer\n");
    }
}
