pub mod embedding;
pub mod error;
pub mod vector;

pub use embedding::{EmbeddingConfig, EmbeddingEngine, OllamaEmbedder};
pub use error::OracleError;
pub use vector::{
    cosine_distance, cosine_similarity, InMemoryVectorIndex, Neighbor, MAX_BOUND_IDS, SqliteVectorIndex,
    VectorIndex,
};
