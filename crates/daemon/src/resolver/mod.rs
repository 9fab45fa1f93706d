//! Gloss Resolver: binds every gloss token to a clip, or marks it unresolved.

use engine::{GlossToken, ResolvedSegment};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clips::{ClipMatch, ClipRepository};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::fallback::FallbackResolver;

pub struct GlossResolver {
    repository: Arc<ClipRepository>,
    fallback: Arc<FallbackResolver>,
    config: ResolverConfig,
}

impl GlossResolver {
    pub fn new(repository: Arc<ClipRepository>, fallback: Arc<FallbackResolver>, config: ResolverConfig) -> Self {
        GlossResolver {
            repository,
            fallback,
            config,
        }
    }

    /// Resolve `glosses` concurrently, returning one segment per token in input order.
    ///
    /// On cancellation this returns immediately. Tasks already fetching keep
    /// running and register their clips for later jobs.
    pub async fn resolve(
        &self,
        glosses: &[GlossToken],
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedSegment>, ResolveError> {
        let permits = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));

        let handles: Vec<_> = glosses
            .iter()
            .cloned()
            .enumerate()
            .map(|(position, token)| {
                let repository = self.repository.clone();
                let fallback = self.fallback.clone();
                let permits = permits.clone();
                let cancel = cancel.clone();
                let accept_approximate = self.config.accept_approximate;
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    if cancel.is_cancelled() {
                        return ResolvedSegment::missing(position, token, "cancelled");
                    }
                    resolve_one(&repository, &fallback, accept_approximate, position, token).await
                })
            })
            .collect();

        let results = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pending = glosses.len(), "resolution cancelled; detaching tasks");
                return Err(ResolveError::Cancelled);
            }
            results = join_all(handles) => results,
        };

        let mut segments: Vec<ResolvedSegment> = results
            .into_iter()
            .zip(glosses)
            .enumerate()
            .map(|(position, (result, token))| match result {
                Ok(segment) => segment,
                Err(e) => {
                    warn!(token = %token, error = %e, "resolution task failed");
                    ResolvedSegment::missing(position, token.clone(), format!("resolution task failed: {}", e))
                }
            })
            .collect();
        segments.sort_by_key(|s| s.position);
        Ok(segments)
    }
}

async fn resolve_one(
    repository: &ClipRepository,
    fallback: &FallbackResolver,
    accept_approximate: bool,
    position: usize,
    token: GlossToken,
) -> ResolvedSegment {
    match repository.lookup(&token) {
        Ok(Some(ClipMatch { record, approximate: false })) => {
            return ResolvedSegment::cache_hit(position, token, record, false);
        }
        Ok(Some(ClipMatch { record, approximate: true })) => {
            // The repository hit stands either way; strict mode only fetches
            // the exact sign so later passes find it.
            if !accept_approximate {
                match fallback.fetch(&token).await {
                    Ok(exact) => debug!(token = %token, clip = %exact.token, "registered exact clip for later passes"),
                    Err(e) => debug!(token = %token, error = %e, "no exact clip online; keeping approximate"),
                }
            }
            return ResolvedSegment::cache_hit(position, token, record, true);
        }
        Ok(None) => {}
        Err(e) => {
            warn!(token = %token, error = %e, "repository lookup failed");
            return ResolvedSegment::missing(position, token, format!("repository error: {}", e));
        }
    }

    match fallback.fetch(&token).await {
        Ok(record) => ResolvedSegment::fetched(position, token, record),
        Err(e) => {
            warn!(token = %token, position, error = %e, "sign unresolved");
            ResolvedSegment::missing(position, token, e.to_string())
        }
    }
}
