//! Compute kernels: typed operations with fixed numeric contracts (spec
//! §4.2). Each submodule owns one operation family; none of them perform
//! GPU submission directly (that is the dispatcher's job, §4.3) — these
//! are the reference numeric contracts the dispatcher's chosen GPU
//! variant must reproduce.

pub mod attention;
pub mod descriptor;
pub mod dequant;
pub mod ffn;
pub mod gather;
pub mod matmul;
pub mod reduce;
pub mod residual;
pub mod rmsnorm;
pub mod rope;

pub use descriptor::KernelDims;
pub use gather::EmbeddingTable;
pub use matmul::{matmul_dispatched, MatmulB};
