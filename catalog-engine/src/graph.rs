//! Upsell / cross-sell materialization.
//!
//! Product relations may form cycles and self-loops. Expansion threads a
//! visited set down each path; a branch gets its own copy, so only a revisit
//! along the same path is cut short. Revisits and the depth boundary both
//! emit a stub.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::{
    CatalogConfig, CatalogError, CatalogResult, EntityId, EntityKind, MaterializedProduct,
    Product, RelatedProduct,
};
use catalog_storage::{CacheCoordinator, CacheKey, ProductRepository};
use tracing::debug;

use crate::repo_call;

type ExpandFuture<'a> = Pin<Box<dyn Future<Output = CatalogResult<MaterializedProduct>> + Send + 'a>>;

/// Expands product relations into a bounded, cycle-free response tree.
pub struct GraphMaterializer {
    products: Arc<dyn ProductRepository>,
    cache: Arc<CacheCoordinator>,
    repository_timeout: Duration,
    default_depth: u32,
    max_depth: u32,
}

impl GraphMaterializer {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        cache: Arc<CacheCoordinator>,
        config: &CatalogConfig,
    ) -> Self {
        Self {
            products,
            cache,
            repository_timeout: config.repository_timeout,
            default_depth: config.default_graph_depth,
            max_depth: config.max_graph_depth,
        }
    }

    fn effective_depth(&self, depth: Option<u32>) -> u32 {
        depth.unwrap_or(self.default_depth).min(self.max_depth)
    }

    /// Load products by id, cache first, in request order. Unknown ids are
    /// absent from the result.
    async fn load_many(&self, ids: &[EntityId]) -> CatalogResult<HashMap<EntityId, Product>> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            if found.contains_key(id) || missing.contains(id) {
                continue;
            }
            match self
                .cache
                .get::<Product>(&CacheKey::entity(EntityKind::Product, *id))
                .await
            {
                Some(product) => {
                    found.insert(*id, product);
                }
                None => missing.push(*id),
            }
        }

        if !missing.is_empty() {
            let loaded = repo_call(
                "product_find_by_ids",
                self.repository_timeout,
                self.products.product_find_by_ids(&missing),
            )
            .await?;
            let ttl = Some(self.cache.settings().entity_ttl);
            for product in loaded {
                self.cache
                    .put(&CacheKey::entity(EntityKind::Product, product.id), &product, ttl)
                    .await;
                found.insert(product.id, product);
            }
        }
        Ok(found)
    }

    /// Expand `root` to `depth` levels (default and ceiling from config).
    pub async fn materialize(
        &self,
        root: &Product,
        depth: Option<u32>,
    ) -> CatalogResult<MaterializedProduct> {
        let depth = self.effective_depth(depth);
        let mut visited = HashSet::new();
        visited.insert(root.id);
        self.expand(root.clone(), depth, visited).await
    }

    /// Load a live product and expand it.
    pub async fn materialize_by_id(
        &self,
        id: EntityId,
        depth: Option<u32>,
    ) -> CatalogResult<MaterializedProduct> {
        let ttl = Some(self.cache.settings().entity_ttl);
        let root = self
            .cache
            .get_or_load_optional(&CacheKey::entity(EntityKind::Product, id), ttl, || {
                repo_call(
                    "product_find_by_id",
                    self.repository_timeout,
                    self.products.product_find_by_id(id),
                )
            })
            .await?
            .filter(|product| !product.is_deleted())
            .ok_or_else(|| CatalogError::not_found(EntityKind::Product, id))?;

        self.materialize(&root, depth).await
    }

    fn expand(&self, product: Product, remaining: u32, visited: HashSet<EntityId>) -> ExpandFuture<'_> {
        Box::pin(async move {
            let upsells = self
                .related(&product.self_refs.upsells, remaining, &visited)
                .await?;
            let cross_sells = self
                .related(&product.self_refs.cross_sells, remaining, &visited)
                .await?;

            Ok(MaterializedProduct {
                id: product.id,
                name: product.name,
                slug: product.slug,
                price_cents: product.price_cents,
                primary_image: product.primary_image,
                category_ids: product.category_ids,
                attributes: product.attributes,
                upsells,
                cross_sells,
            })
        })
    }

    async fn related(
        &self,
        ids: &[EntityId],
        remaining: u32,
        visited: &HashSet<EntityId>,
    ) -> CatalogResult<Vec<RelatedProduct>> {
        let loaded = self.load_many(ids).await?;
        let mut related = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(product) = loaded.get(id).filter(|p| !p.is_deleted()) else {
                debug!(product_id = %id, "skipping missing or deleted relation");
                continue;
            };

            if visited.contains(id) || remaining == 0 {
                debug!(product_id = %id, revisit = visited.contains(id), "emitting stub");
                related.push(RelatedProduct::Stub(product.stub()));
                continue;
            }

            let mut branch = visited.clone();
            branch.insert(*id);
            let expanded = self.expand(product.clone(), remaining - 1, branch).await?;
            related.push(RelatedProduct::Expanded(Box::new(expanded)));
        }
        Ok(related)
    }
}
