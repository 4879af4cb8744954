//! Gateway services: existence policy and input normalization on top of the
//! document store.
//!
//! Every service is a cheap clonable handle over the shared [`Store`]; none
//! keeps state of its own. Existence checks go through [`discovery`] and are
//! made before any mutation. A check followed by an act is two round-trips
//! with no isolation between them; where the store offers a conditional
//! primitive (unique-constrained create, row-counted delete) a lost race is
//! still reported with the right kind.

pub mod collection_service;
pub mod database_service;
pub mod discovery;
pub mod document_service;
pub mod file_service;

use crate::store::{Store, StoreError};
use collection_service::CollectionService;
use database_service::DatabaseService;
use document_service::DocumentService;
use file_service::FileService;
use thiserror::Error;
use tracing::error;

/// Failure kinds reported to callers. The message is safe to show; store
/// causes are logged, never carried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    MalformedInput(String),
    #[error("{0}")]
    Deserialize(String),
    #[error("{0}")]
    DatasourceFault(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Stable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "NotFound",
            GatewayError::AlreadyExists(_) => "AlreadyExists",
            GatewayError::MalformedInput(_) => "MalformedInput",
            GatewayError::Deserialize(_) => "Deserialize",
            GatewayError::DatasourceFault(_) => "DatasourceFault",
        }
    }
}

/// Re-wrap a store error as `DatasourceFault`, logging the cause.
pub(crate) fn datasource_fault(message: &'static str) -> impl FnOnce(StoreError) -> GatewayError {
    move |err| {
        error!(error = %err, "{}", message);
        GatewayError::DatasourceFault(message.to_string())
    }
}

/// Reject empty identifiers before they reach the store.
pub(crate) fn require(value: &str, what: &str) -> GatewayResult<()> {
    if value.is_empty() {
        Err(GatewayError::MalformedInput(format!("The {} must not be empty", what)))
    } else {
        Ok(())
    }
}

/// All four services over one store handle; this is the router state.
#[derive(Clone)]
pub struct Gateway {
    pub store: Store,
    pub databases: DatabaseService,
    pub collections: CollectionService,
    pub documents: DocumentService,
    pub files: FileService,
}

impl Gateway {
    pub fn new(store: Store) -> Self {
        Self {
            databases: DatabaseService::new(store.clone()),
            collections: CollectionService::new(store.clone()),
            documents: DocumentService::new(store.clone()),
            files: FileService::new(store.clone()),
            store,
        }
    }
}
