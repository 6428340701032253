//! Rule service contract and the replication-lag implementation

use std::cmp::Ordering;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::config::RulesConfig;
use super::errors::{RulesError, RulesResult};
use crate::context::Context;
use crate::node::{Node, NodeError, Position};

/// Health evaluation and candidate ranking.
#[async_trait]
pub trait RuleService: Send + Sync + std::fmt::Debug {
    /// Pure predicate over the last observed positions.
    fn is_node_healthy(&self, node: &Node) -> bool;

    /// Poll until `node` has caught up with its parent.
    ///
    /// Fails with `NodeIsBehind` if `ctx` ends first.
    async fn wait_for_node_to_be_healthy(&self, ctx: &Context, node: &Node) -> RulesResult<()>;

    /// Children of `parent` eligible for promotion, ordered by uid.
    async fn suitable_candidates(&self, ctx: &Context, parent: &Node) -> RulesResult<Vec<Node>>;

    /// The most advanced suitable candidate. Ties go to the lowest uid.
    async fn best_candidate(&self, ctx: &Context, parent: &Node) -> RulesResult<Node>;
}

/// Lag-based rules for position-replicating databases.
#[derive(Debug, Clone, Default)]
pub struct ReplicationRules {
    config: RulesConfig,
}

impl ReplicationRules {
    pub fn new(config: RulesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    fn within_lag(&self, child: &Position, parent: &Position) -> Result<bool, NodeError> {
        Ok(child.lag_behind(parent)? <= self.config.max_lag)
    }

    /// Refresh positions and return eligible children with their positions.
    async fn eligible(&self, ctx: &Context, parent: &Node) -> RulesResult<Vec<(Node, Position)>> {
        let children = parent.children();
        if children.is_empty() {
            return Err(RulesError::no_candidates(parent.uid()));
        }

        let (parent_position, child_positions) = futures_util::join!(
            parent.position(ctx),
            join_all(children.iter().map(|c| c.position(ctx)))
        );

        let parent_position = match parent_position {
            Ok(pos) => Some(pos),
            Err(e) => {
                warn!(
                    parent = %parent.uid(),
                    error = %e,
                    "parent position unavailable, lag unknown"
                );
                parent.last_known_position()
            }
        };

        let mut eligible = Vec::new();
        for (child, position) in children.into_iter().zip(child_positions) {
            let position = match position {
                Ok(pos) => pos,
                Err(e) => {
                    warn!(candidate = %child.uid(), error = %e, "skipping unreachable replica");
                    continue;
                }
            };
            if self.config.is_excluded(child.uid()) {
                debug!(candidate = %child.uid(), "excluded by policy");
                continue;
            }
            if child.writable() {
                warn!(candidate = %child.uid(), "replica reports writable, skipping");
                continue;
            }
            if let Some(parent_position) = &parent_position {
                match self.within_lag(&position, parent_position) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(candidate = %child.uid(), %position, "too far behind");
                        continue;
                    }
                    Err(e) => {
                        warn!(candidate = %child.uid(), error = %e, "lineage differs from parent");
                        continue;
                    }
                }
            }
            eligible.push((child, position));
        }

        if eligible.is_empty() {
            return Err(RulesError::no_candidates(parent.uid()));
        }
        eligible.sort_by(|(a, _), (b, _)| a.uid().cmp(b.uid()));
        Ok(eligible)
    }
}

#[async_trait]
impl RuleService for ReplicationRules {
    fn is_node_healthy(&self, node: &Node) -> bool {
        let parent = match node.parent() {
            None => return node.writable(),
            Some(parent) => parent,
        };
        match (node.last_known_position(), parent.last_known_position()) {
            (Some(mine), Some(theirs)) => self.within_lag(&mine, &theirs).unwrap_or(false),
            _ => false,
        }
    }

    async fn wait_for_node_to_be_healthy(&self, ctx: &Context, node: &Node) -> RulesResult<()> {
        let parent = match node.parent() {
            Some(parent) => parent,
            None if node.writable() => return Ok(()),
            None => {
                return Err(RulesError::Orphaned {
                    uid: node.uid().to_string(),
                })
            }
        };

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        loop {
            tokio::select! {
                biased;
                _ = ctx.done() => {
                    return Err(RulesError::NodeIsBehind { uid: node.uid().to_string() });
                }
                _ = ticker.tick() => {}
            }

            match node.compare_position(ctx, &parent).await {
                Ok(Ordering::Less) => {
                    debug!(node = %node.uid(), parent = %parent.uid(), "still catching up");
                }
                Ok(_) => return Ok(()),
                Err(e) if e.is_precondition_violation() => return Err(e.into()),
                Err(e) => {
                    debug!(node = %node.uid(), error = %e, "position poll failed");
                }
            }
        }
    }

    async fn suitable_candidates(&self, ctx: &Context, parent: &Node) -> RulesResult<Vec<Node>> {
        Ok(self
            .eligible(ctx, parent)
            .await?
            .into_iter()
            .map(|(node, _)| node)
            .collect())
    }

    async fn best_candidate(&self, ctx: &Context, parent: &Node) -> RulesResult<Node> {
        let mut candidates = self.eligible(ctx, parent).await?.into_iter();
        let (mut best, mut best_position) = candidates
            .next()
            .ok_or_else(|| RulesError::no_candidates(parent.uid()))?;

        for (candidate, position) in candidates {
            if position.compare(&best_position)? == Ordering::Greater {
                best = candidate;
                best_position = position;
            }
        }

        debug!(
            parent = %parent.uid(),
            candidate = %best.uid(),
            position = %best_position,
            "best candidate"
        );
        Ok(best)
    }
}
