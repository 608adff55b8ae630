mod error;
mod store;

pub use error::VectorError;
pub use store::{SimilarMessage, VectorStore};
