mod batch;
mod header;
mod record;
pub(crate) mod utils;

pub use batch::{Batch, BatchIter, BatchPolicy, Layout, DEFAULT_BATCH_SIZE};
pub use header::{HeaderEntry, VcfHeader, MANDATORY_COLUMNS};
pub use record::{FieldSpans, Record, RecordRef, VcfRecord};
pub use utils::Span;

pub(crate) use batch::BatchAssembler;
pub(crate) use utils::trim_cr;
