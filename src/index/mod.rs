//! Vector storage, membership filtering and similarity search.

pub mod bloom;
pub mod metric;
pub mod neighbors;
pub mod store;

pub use bloom::{ContentSignature, MembershipFilter};
pub use metric::Metric;
pub use neighbors::{IndexConfig, NeighborIndex};
pub use store::VectorStore;
