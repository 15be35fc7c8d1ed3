// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The sample data format schema: a small XML description of a fixed binary
//! record layout, registered with the CHP map so a mug can decode a tap's
//! samples without out-of-band knowledge (`spec.md` §4.D, supplemented from
//! `original_source/src/data_format_parser.cpp`).

pub mod format;
pub mod parser;

pub use format::{DataFormat, DataItem};
pub use parser::{create_from_items, is_valid, parse_from_file, parse_from_string};
