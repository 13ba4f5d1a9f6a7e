pub mod error;
pub mod hashing;
pub mod merge;
pub mod metadata;
pub mod path_safety;
pub mod progress;
pub mod split;
pub mod units;
pub mod verify;

pub use error::{ErrorKind, SplitError};
pub use merge::{merge, merge_into, MergeOptions, MergeOutcome};
pub use metadata::{discover, MetadataBuilder, PartDescriptor, SplitMetadata};
pub use progress::Progress;
pub use split::{SplitConfig, Splitter};
pub use verify::{verify, PartIssue, VerifyReport};
