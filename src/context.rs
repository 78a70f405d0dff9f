//! Context assembly: strategy chain plus budget allocation.
//!
//! A [`ContextAssembler`] holds an ordered list of [`ContextStrategy`]
//! implementations. For each request it walks the chain and takes the
//! first strategy that yields context; a failing strategy is logged
//! and skipped. An empty result from every strategy is not an error,
//! the caller simply proceeds with no document context.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::budget::{allocate_token_budget, BudgetAllocation};
use crate::condense::condense_context;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::RetrievedContext;
use crate::provider::ProviderRegistry;
use crate::retrieve::retrieve_relevant_chunks;

/// Everything needed to assemble context for one generation request.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub case_id: String,
    pub fact_input: String,
    pub additional_notes: Option<String>,
    /// Retrieval query; usually the fact input, sometimes a sharper
    /// reformulation.
    pub query: String,
}

/// Budget-fitted context ready to be rendered into a prompt.
#[derive(Debug, Clone)]
pub struct PreparedContext {
    pub allocation: BudgetAllocation,
    /// Name of the strategy that produced the context items, for
    /// logging. `None` when every strategy came up empty.
    pub strategy: Option<&'static str>,
}

/// One way of producing document context for a request.
#[async_trait]
pub trait ContextStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce context items. An empty vec means "nothing from me,
    /// try the next strategy".
    async fn retrieve(&self, request: &ContextRequest) -> Result<Vec<RetrievedContext>>;
}

/// Condenses the full text of all linked documents into a single
/// context item. Yields nothing when condensation is unavailable.
pub struct CondensedContextStrategy {
    pool: SqlitePool,
    registry: Arc<ProviderRegistry>,
    config: Config,
}

impl CondensedContextStrategy {
    pub fn new(pool: SqlitePool, registry: Arc<ProviderRegistry>, config: Config) -> Self {
        Self {
            pool,
            registry,
            config,
        }
    }
}

#[async_trait]
impl ContextStrategy for CondensedContextStrategy {
    fn name(&self) -> &'static str {
        "condensed"
    }

    async fn retrieve(&self, request: &ContextRequest) -> Result<Vec<RetrievedContext>> {
        let condensed = condense_context(
            &self.pool,
            &self.registry,
            &self.config,
            &request.case_id,
            &request.fact_input,
            request.additional_notes.as_deref(),
        )
        .await?;

        Ok(match condensed {
            // A digest is not a ranked chunk; similarity is pinned at
            // the ceiling so the allocator treats it first-class.
            Some(content) => vec![RetrievedContext {
                content,
                source_file: "condensed".to_string(),
                similarity: 1.0,
            }],
            None => Vec::new(),
        })
    }
}

/// Classic chunk retrieval over the case's embedded documents.
pub struct ChunkRetrievalStrategy {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    config: Config,
}

impl ChunkRetrievalStrategy {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>, config: Config) -> Self {
        Self {
            pool,
            embedder,
            config,
        }
    }
}

#[async_trait]
impl ContextStrategy for ChunkRetrievalStrategy {
    fn name(&self) -> &'static str {
        "chunks"
    }

    async fn retrieve(&self, request: &ContextRequest) -> Result<Vec<RetrievedContext>> {
        retrieve_relevant_chunks(
            &self.pool,
            self.embedder.as_ref(),
            &request.case_id,
            &request.query,
            self.config.retrieval.top_k,
            self.config.retrieval.similarity_threshold,
        )
        .await
    }
}

/// Ordered strategy chain plus the budget allocator.
pub struct ContextAssembler {
    strategies: Vec<Box<dyn ContextStrategy>>,
    budget: crate::config::BudgetConfig,
}

impl ContextAssembler {
    pub fn new(strategies: Vec<Box<dyn ContextStrategy>>, budget: crate::config::BudgetConfig) -> Self {
        Self { strategies, budget }
    }

    /// Standard chain: condense first, fall back to chunk retrieval.
    pub fn standard(
        pool: SqlitePool,
        registry: Arc<ProviderRegistry>,
        embedder: Arc<dyn Embedder>,
        config: &Config,
    ) -> Self {
        Self::new(
            vec![
                Box::new(CondensedContextStrategy::new(
                    pool.clone(),
                    registry,
                    config.clone(),
                )),
                Box::new(ChunkRetrievalStrategy::new(pool, embedder, config.clone())),
            ],
            config.budget.clone(),
        )
    }

    /// Walk the chain; first non-empty result wins. Strategy errors
    /// are logged and skipped.
    pub async fn gather(
        &self,
        request: &ContextRequest,
    ) -> (Vec<RetrievedContext>, Option<&'static str>) {
        for strategy in &self.strategies {
            match strategy.retrieve(request).await {
                Ok(items) if !items.is_empty() => {
                    debug!(strategy = strategy.name(), items = items.len(), "context gathered");
                    return (items, Some(strategy.name()));
                }
                Ok(_) => {
                    debug!(strategy = strategy.name(), "strategy yielded nothing, trying next");
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "strategy failed, trying next");
                }
            }
        }
        (Vec::new(), None)
    }

    /// Gather context and fit it, together with the request's facts
    /// and notes, into the token budget.
    pub async fn prepare(&self, request: &ContextRequest) -> PreparedContext {
        let (items, strategy) = self.gather(request).await;
        let allocation = allocate_token_budget(
            &request.fact_input,
            request.additional_notes.as_deref(),
            &items,
            &self.budget,
        );
        PreparedContext {
            allocation,
            strategy,
        }
    }
}
