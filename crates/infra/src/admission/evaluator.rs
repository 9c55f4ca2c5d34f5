use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use stockgate_core::{DomainError, DomainResult, ProductId};
use stockgate_products::Product;
use stockgate_sales::{OrderItem, StockDelta, aggregate_demand};

use crate::cache::StockCache;
use crate::store::{ProductStore, with_timeout};

/// Where the data behind a reservation decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationSource {
    /// Every referenced product had a live cache entry.
    Cache,
    /// At least one entry was missing, so the whole set was read from the store.
    Store,
}

/// Advisory reservation: the per-product deltas an order would apply.
///
/// Nothing is committed yet; the store re-checks every delta at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub deltas: Vec<StockDelta>,
    pub source: ReservationSource,
}

/// Decides whether an order's demand fits current stock.
///
/// Uses cached snapshots only when *all* of them are present. A single miss
/// (or any cache error) discards the cached values and re-reads the full set
/// from the store in one bulk query, so a decision is never made on a mix of
/// cached and authoritative rows.
#[derive(Debug, Clone)]
pub struct ReservationEvaluator<S, C> {
    store: S,
    cache: C,
    store_timeout: Duration,
}

impl<S, C> ReservationEvaluator<S, C>
where
    S: ProductStore,
    C: StockCache,
{
    pub fn new(store: S, cache: C, store_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            store_timeout,
        }
    }

    pub async fn evaluate(&self, items: &[OrderItem]) -> DomainResult<Reservation> {
        let deltas = aggregate_demand(items)?;

        if let Some(snapshots) = self.cached_snapshots(&deltas).await {
            check_sufficiency(&deltas, &snapshots)?;
            return Ok(Reservation {
                deltas,
                source: ReservationSource::Cache,
            });
        }

        let ids: Vec<ProductId> = deltas.iter().map(|d| d.product_id).collect();
        let rows = with_timeout(self.store_timeout, self.store.get_products_bulk(&ids))
            .await
            .map_err(DomainError::from)?;
        check_sufficiency(&deltas, &rows)?;

        Ok(Reservation {
            deltas,
            source: ReservationSource::Store,
        })
    }

    /// All snapshots for `deltas`, or `None` if any lookup missed or failed.
    async fn cached_snapshots(&self, deltas: &[StockDelta]) -> Option<HashMap<ProductId, Product>> {
        let lookups = join_all(deltas.iter().map(|d| self.cache.get(d.product_id))).await;

        let mut found = HashMap::with_capacity(deltas.len());
        for (d, lookup) in deltas.iter().zip(lookups) {
            match lookup {
                Ok(Some(p)) => {
                    found.insert(d.product_id, p);
                }
                Ok(None) => {
                    debug!(product_id = %d.product_id, "cache miss; evaluating against store");
                    return None;
                }
                Err(err) => {
                    warn!(product_id = %d.product_id, error = %err, "cache read failed; evaluating against store");
                    return None;
                }
            }
        }
        Some(found)
    }
}

/// Check every delta against `rows`, reporting the first offender in `deltas` order.
fn check_sufficiency(deltas: &[StockDelta], rows: &HashMap<ProductId, Product>) -> DomainResult<()> {
    for d in deltas {
        let product = rows
            .get(&d.product_id)
            .ok_or(DomainError::not_found(d.product_id))?;
        if !product.can_fulfil(d.quantity()) {
            return Err(DomainError::insufficient_stock(d.product_id));
        }
    }
    Ok(())
}
