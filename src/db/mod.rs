//! Persistence layer: MongoDB client wrapper and document schemas

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
