//! Entity dependency graph.
//!
//! Maps domain entities to the cache tags their writes dirty, plus a static
//! relation table for cascading one hop to related entities. The hop depth is
//! bounded (default 1) so a busy write path cannot trigger an invalidation
//! storm across the whole key space.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::distributed::DistributedCache;
use crate::local::LocalCache;
use crate::tags::TagIndex;

/// Static entity → tags and entity → related-entities tables.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    entity_tags: HashMap<String, Vec<String>>,
    relations: HashMap<String, Vec<String>>,
    hop_depth: usize,
}

impl DependencyGraph {
    /// Builds a graph from explicit tables.
    pub fn new(
        entity_tags: HashMap<String, Vec<String>>,
        relations: HashMap<String, Vec<String>>,
        hop_depth: usize,
    ) -> Self {
        Self {
            entity_tags,
            relations,
            hop_depth,
        }
    }

    /// Default tables for the warehouse domain.
    pub fn warehouse_defaults(hop_depth: usize) -> Self {
        let entity_tags = HashMap::from([
            (
                "products".to_string(),
                vec!["products".into(), "product_list".into()],
            ),
            (
                "inventory".to_string(),
                vec!["inventory".into(), "product_stock".into(), "dashboard".into()],
            ),
            (
                "stock_movements".to_string(),
                vec!["stock_movements".into(), "movement_history".into()],
            ),
            (
                "warehouses".to_string(),
                vec!["warehouses".into(), "locations".into()],
            ),
            ("categories".to_string(), vec!["categories".into()]),
            ("suppliers".to_string(), vec!["suppliers".into()]),
            (
                "orders".to_string(),
                vec!["orders".into(), "dashboard".into()],
            ),
            ("search".to_string(), vec!["search".into()]),
        ]);

        let relations = HashMap::from([
            (
                "products".to_string(),
                vec!["inventory".into(), "search".into()],
            ),
            (
                "inventory".to_string(),
                vec!["stock_movements".into(), "search".into()],
            ),
            ("warehouses".to_string(), vec!["inventory".into()]),
            ("categories".to_string(), vec!["products".into()]),
            ("orders".to_string(), vec!["inventory".into()]),
        ]);

        Self::new(entity_tags, relations, hop_depth)
    }

    /// Direct tags for an entity.
    pub fn direct_tags(&self, entity: &str) -> Vec<String> {
        self.entity_tags.get(entity).cloned().unwrap_or_default()
    }

    /// Tags affected by a write to `entity`.
    ///
    /// With `cascade`, related entities are walked breadth-first up to the
    /// configured hop depth; no entity is visited twice.
    pub fn tags_for_entity(&self, entity: &str, cascade: bool) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        let mut seen_tags: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        queue.push_back((entity.to_string(), 0));
        visited.insert(entity.to_string());

        while let Some((current, depth)) = queue.pop_front() {
            for tag in self.direct_tags(&current) {
                if seen_tags.insert(tag.clone()) {
                    tags.push(tag);
                }
            }
            if cascade && depth < self.hop_depth {
                for related in self.relations.get(&current).into_iter().flatten() {
                    if visited.insert(related.clone()) {
                        queue.push_back((related.clone(), depth + 1));
                    }
                }
            }
        }

        tags
    }

    /// Invalidates every tag dirtied by a write to `entity`.
    ///
    /// Returns the total number of cache keys removed via the tag index.
    pub async fn invalidate_entity(
        &self,
        entity: &str,
        cascade: bool,
        index: &TagIndex,
        l1: &LocalCache,
        l2: &DistributedCache,
    ) -> usize {
        let tags = self.tags_for_entity(entity, cascade);
        let mut removed = 0;
        for tag in &tags {
            removed += index.invalidate_tag(tag, l1, l2).await;
        }
        debug!(entity = %entity, cascade, tags = tags.len(), removed, "invalidated entity");
        removed
    }

    /// Edge list view for the admin surface.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .entity_tags
            .iter()
            .map(|(entity, tags)| DependencyEdge {
                entity: entity.clone(),
                tags: tags.clone(),
                related: self.relations.get(entity).cloned().unwrap_or_default(),
            })
            .collect();
        edges.sort_by(|a, b| a.entity.cmp(&b.entity));
        edges
    }

    /// Configured cascade hop depth.
    pub fn hop_depth(&self) -> usize {
        self.hop_depth
    }
}

/// One entity's row in the dependency tables.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub entity: String,
    pub tags: Vec<String>,
    pub related: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(hop_depth: usize) -> DependencyGraph {
        let entity_tags = HashMap::from([
            ("products".to_string(), vec!["products".into()]),
            (
                "inventory".to_string(),
                vec!["inventory".into(), "product_stock".into()],
            ),
            ("search".to_string(), vec!["search".into()]),
            ("stock_movements".to_string(), vec!["stock_movements".into()]),
        ]);
        let relations = HashMap::from([
            (
                "products".to_string(),
                vec!["inventory".into(), "search".into()],
            ),
            ("inventory".to_string(), vec!["stock_movements".into()]),
        ]);
        DependencyGraph::new(entity_tags, relations, hop_depth)
    }

    #[test]
    fn test_direct_tags_without_cascade() {
        let g = graph(1);
        assert_eq!(g.tags_for_entity("products", false), vec!["products"]);
    }

    #[test]
    fn test_one_hop_cascade() {
        let g = graph(1);
        let tags = g.tags_for_entity("products", true);
        assert_eq!(tags, vec!["products", "inventory", "product_stock", "search"]);
        // One hop only: stock_movements (two hops away) not included
        assert!(!tags.contains(&"stock_movements".to_string()));
    }

    #[test]
    fn test_deeper_cascade_is_opt_in() {
        let g = graph(2);
        let tags = g.tags_for_entity("products", true);
        assert!(tags.contains(&"stock_movements".to_string()));
    }

    #[test]
    fn test_unknown_entity_has_no_tags() {
        let g = graph(1);
        assert!(g.tags_for_entity("nonexistent", true).is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let entity_tags = HashMap::from([
            ("a".to_string(), vec!["tag_a".into()]),
            ("b".to_string(), vec!["tag_b".into()]),
        ]);
        let relations = HashMap::from([
            ("a".to_string(), vec!["b".into()]),
            ("b".to_string(), vec!["a".into()]),
        ]);
        let g = DependencyGraph::new(entity_tags, relations, 5);

        let mut tags = g.tags_for_entity("a", true);
        tags.sort();
        assert_eq!(tags, vec!["tag_a".to_string(), "tag_b".to_string()]);
    }

    #[test]
    fn test_warehouse_defaults_products_cascade() {
        let g = DependencyGraph::warehouse_defaults(1);
        let tags = g.tags_for_entity("products", true);
        for expected in ["products", "inventory", "product_stock", "search"] {
            assert!(tags.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_edges_sorted() {
        let g = graph(1);
        let edges = g.edges();
        assert_eq!(edges.first().unwrap().entity, "inventory");
        assert!(edges.windows(2).all(|w| w[0].entity <= w[1].entity));
    }
}
