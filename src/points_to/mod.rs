//! Points-To Graph (C2): per-function mapping from IR values to sets of
//! (object, offset) locations, plus the bindings stored at each location.

mod graph;
mod result;

pub use graph::PointsToGraph;
pub use result::{PTResult, PTResultId, PtEntry};
