//! Retrieval-augmented answering: chunking, retrieval and generation.

pub mod chunker;
pub mod generator;
pub mod grounding;
pub mod intent;
pub mod prompts;
pub mod retriever;

pub use chunker::Chunker;
pub use generator::Generator;
pub use grounding::{ModelAnswer, ModelCitation};
pub use intent::QueryStrategy;
pub use retriever::{RetrievalResult, RetrievedChunk, Retriever};
