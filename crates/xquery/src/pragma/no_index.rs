//! `exist:no-index`: evaluates the decorated expression by tree traversal.
//!
//! All the work happens during analysis. The flag makes location steps
//! navigate the tree instead of querying the structural index and hides the
//! index capability of comparisons and functions, so no optimizer or
//! set-at-a-time predicate ever sees them.

use crate::analyze::{AnalyzeContextInfo, AnalyzeFlags};

pub(crate) fn analyze(info: &mut AnalyzeContextInfo) {
    info.flags |= AnalyzeFlags::USE_TREE_TRAVERSAL;
}
