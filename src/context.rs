//! ContextAssembler (C7) — combines cache/vector/graph outputs into a
//! ranked `PromptContext` (spec.md §4.7).

use std::collections::HashSet;

use crate::graph::NeighborhoodEntry;
use crate::schema::render::render_table;
use crate::types::{ConnectionDescriptor, ForeignKey, PromptContext, Schema};
use crate::vector::VectorHit;

const DEFAULT_TOP_K: usize = 8;

pub struct ContextAssembler {
    top_k: usize,
}

impl ContextAssembler {
    pub fn new(top_k: usize) -> Self {
        Self { top_k: if top_k == 0 { DEFAULT_TOP_K } else { top_k } }
    }

    #[tracing::instrument(skip(self, schema, vector_hits, graph_slice))]
    pub fn assemble(
        &self,
        user_id: &str,
        descriptor: &ConnectionDescriptor,
        schema: Option<&Schema>,
        vector_hits: &[VectorHit],
        graph_slice: &[NeighborhoodEntry],
    ) -> PromptContext {
        let mut ranked: Vec<(String, f32, String)> = vector_hits
            .iter()
            .take(self.top_k)
            .map(|hit| {
                let text = schema
                    .and_then(|s| s.find_table(&hit.embedding.table_id))
                    .map(render_table)
                    .unwrap_or_else(|| hit.embedding.text.clone());
                (hit.embedding.table_id.clone(), hit.score, text)
            })
            .collect();

        // No vector hits (degraded store): fall back to every cached table
        // so the model still has schema context instead of none at all.
        if ranked.is_empty() {
            if let Some(schema) = schema {
                ranked = schema
                    .tables
                    .iter()
                    .take(self.top_k)
                    .map(|t| (t.id(), 0.0, render_table(t)))
                    .collect();
            }
        }

        let ranked_ids: HashSet<&str> = ranked.iter().map(|(id, _, _)| id.as_str()).collect();

        // An FK belongs in the context if either endpoint is ranked — the
        // owning table, or the table it points at — not just the former,
        // so an inbound reference from an unranked table is still surfaced.
        let relationships: Vec<ForeignKey> = schema
            .map(|s| {
                let mut out = Vec::new();
                for table in &s.tables {
                    let owner_ranked = ranked_ids.contains(table.id().as_str());
                    for fk in &table.foreign_keys {
                        let target_ranked = ranked_ids.contains(fk.referenced_id().as_str());
                        if owner_ranked || target_ranked {
                            out.push(fk.clone());
                        }
                    }
                }
                out
            })
            .unwrap_or_default();

        let join_hints: Vec<String> = graph_slice
            .iter()
            .take(3)
            .map(|entry| format!("{} is {} hop(s) away via {}", entry.table_id, entry.distance, entry.edge_kind))
            .collect();

        PromptContext {
            engine: descriptor.engine,
            database_name: descriptor.database.clone(),
            ranked_tables: ranked,
            relationships,
            join_hints,
            memory_key: user_id.to_string(),
        }
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Sensitive;
    use crate::types::{Column, Credentials, EngineKind, Schema, SchemaEmbedding, Table};
    use std::collections::{BTreeSet, HashMap};

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            user_id: "alice".to_string(),
            connection_id: "c1".to_string(),
            engine: EngineKind::RelationalA,
            host: "localhost".to_string(),
            port: 5432,
            database: "pizza_shop".to_string(),
            credentials: Credentials { username: "u".to_string(), password: Sensitive::new("p".to_string()) },
            properties: HashMap::new(),
        }
    }

    fn schema() -> Schema {
        Schema {
            engine: EngineKind::RelationalA,
            database_name: "pizza_shop".to_string(),
            namespaces: BTreeSet::new(),
            tables: vec![Table {
                namespace: "pizza_shop".to_string(),
                name: "customer".to_string(),
                comment: None,
                columns: vec![Column {
                    name: "id".to_string(),
                    type_name: "int".to_string(),
                    size: None,
                    nullable: false,
                    default_value: None,
                    comment: None,
                    ordinal: 0,
                }],
                primary_key: BTreeSet::new(),
                foreign_keys: Vec::new(),
                indexes: Vec::new(),
            }],
        }
    }

    #[test]
    fn memory_key_is_user_id() {
        let assembler = ContextAssembler::default();
        let ctx = assembler.assemble("alice", &descriptor(), None, &[], &[]);
        assert_eq!(ctx.memory_key, "alice");
    }

    #[test]
    fn empty_vector_hits_fall_back_to_full_schema() {
        let assembler = ContextAssembler::default();
        let schema = schema();
        let ctx = assembler.assemble("alice", &descriptor(), Some(&schema), &[], &[]);
        assert_eq!(ctx.ranked_tables.len(), 1);
        assert_eq!(ctx.ranked_tables[0].0, "pizza_shop.customer");
    }

    #[test]
    fn vector_hit_uses_schema_rendering_when_available() {
        let assembler = ContextAssembler::default();
        let schema = schema();
        let embedding = SchemaEmbedding {
            id: uuid::Uuid::new_v4(),
            connection_id: "c1".to_string(),
            user_id: "alice".to_string(),
            table_id: "pizza_shop.customer".to_string(),
            text: "stale cached text".to_string(),
            vector: vec![0.0; 384],
            created_at: chrono::Utc::now(),
        };
        let hit = VectorHit { embedding, score: 0.9 };
        let ctx = assembler.assemble("alice", &descriptor(), Some(&schema), &[hit], &[]);
        assert!(ctx.ranked_tables[0].2.starts_with("Table: pizza_shop.customer"));
    }

    #[test]
    fn inbound_fk_from_an_unranked_table_is_still_surfaced() {
        let assembler = ContextAssembler::default();
        let mut schema = schema();
        schema.tables.push(Table {
            namespace: "pizza_shop".to_string(),
            name: "order".to_string(),
            comment: None,
            columns: vec![Column {
                name: "customer_id".to_string(),
                type_name: "int".to_string(),
                size: None,
                nullable: false,
                default_value: None,
                comment: None,
                ordinal: 0,
            }],
            primary_key: BTreeSet::new(),
            foreign_keys: vec![ForeignKey {
                column: "customer_id".to_string(),
                referenced_namespace: Some("pizza_shop".to_string()),
                referenced_table: "customer".to_string(),
                referenced_column: "id".to_string(),
                heuristic: false,
            }],
            indexes: Vec::new(),
        });

        let embedding = SchemaEmbedding {
            id: uuid::Uuid::new_v4(),
            connection_id: "c1".to_string(),
            user_id: "alice".to_string(),
            table_id: "pizza_shop.customer".to_string(),
            text: "Table: pizza_shop.customer".to_string(),
            vector: vec![0.0; 384],
            created_at: chrono::Utc::now(),
        };
        let hit = VectorHit { embedding, score: 0.9 };
        // Only "customer" is ranked; "order" (the FK's owner) is not.
        let ctx = assembler.assemble("alice", &descriptor(), Some(&schema), &[hit], &[]);
        assert_eq!(ctx.relationships.len(), 1);
        assert_eq!(ctx.relationships[0].referenced_table, "customer");
    }
}
