//! Directory grouping and parallel record extraction.
//!
//! [`group_tree`] partitions a dataset directory into [`Group`]s, and
//! [`convert`] fans those groups out to a pool of transform workers,
//! gathering the resulting records into a feedstock.

pub mod convert;
pub mod dataset;
pub mod error;
pub mod group;
pub mod parser;
pub mod transform;

pub use convert::{convert, ConvertOutput, ConvertParams};
pub use dataset::{normalize_dataset, source_id};
pub use error::{ConvertError, ParseError};
pub use group::{group_tree, FormatRule, Group, GroupConfig};
pub use parser::{omniparse, Parser, ParserKind};
pub use transform::{transform_group, TransformContext};
