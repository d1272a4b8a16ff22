mod relational;
mod vector;

pub use relational::RelationalStore;
pub use vector::{NearestHit, Prefilter, VectorStore, VectorStoreWriter};
