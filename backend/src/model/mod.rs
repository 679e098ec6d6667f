pub mod labels;
pub mod oracle;
pub mod predict;
pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch;

pub use labels::{ClassIndex, ClassLabels};
pub use oracle::{Oracle, OracleError};
pub use preprocess::{prepare, PreparedImage, PreprocessError};
