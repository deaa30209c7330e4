//! SchemaExtractor (C3) — wraps an `EngineDriver::extract_schema` call and
//! produces the canonical natural-language rendering used as embedding text
//! (spec.md §4.3). Kept as its own module, distinct from the drivers that
//! perform the actual introspection, since the rendering function is a
//! standalone responsibility the drivers don't need to know about.

pub mod render;

use std::sync::Arc;

use crate::engine::EngineDriver;
use crate::error::AppResult;
use crate::types::{ConnectionDescriptor, Schema};

pub struct SchemaExtractor {
    driver: Arc<dyn EngineDriver>,
}

impl SchemaExtractor {
    pub fn new(driver: Arc<dyn EngineDriver>) -> Self {
        Self { driver }
    }

    #[tracing::instrument(skip(self))]
    pub async fn extract(&self, descriptor: &ConnectionDescriptor) -> AppResult<Schema> {
        self.driver.extract_schema(descriptor).await
    }
}
