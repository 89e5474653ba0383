pub mod config;
pub mod error;
pub mod feedstock;
pub mod merge;

pub use config::Config;
pub use error::*;
pub use feedstock::{FeedstockReader, FeedstockWriter, Record};
pub use merge::{merge, merge_records};
