//! Canonical natural-language rendering of a `Table`, used both as vector
//! embedding text and as the per-table fragment in assembled prompt context
//! (spec.md §4.3).

use crate::types::Table;

pub fn render_table(table: &Table) -> String {
    let mut out = format!("Table: {}", table.id());
    if let Some(comment) = &table.comment {
        out.push_str(&format!(" - {}", comment));
    }
    out.push_str(". Columns: ");

    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| match &c.comment {
            Some(comment) => format!("{} ({}) - {}", c.name, c.type_name, comment),
            None => format!("{} ({})", c.name, c.type_name),
        })
        .collect();
    out.push_str(&columns.join(", "));
    out.push('.');

    if !table.foreign_keys.is_empty() {
        out.push_str(" Relationships: ");
        let rels: Vec<String> = table
            .foreign_keys
            .iter()
            .map(|fk| format!("{} references {}.{}", fk.column, fk.referenced_table, fk.referenced_column))
            .collect();
        out.push_str(&rels.join(", "));
        out.push('.');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ForeignKey};
    use std::collections::BTreeSet;

    #[test]
    fn renders_columns_and_relationships() {
        let table = Table {
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
        };

        let rendered = render_table(&table);
        assert!(rendered.starts_with("Table: pizza_shop.order"));
        assert!(rendered.contains("customer_id (int)"));
        assert!(rendered.contains("customer_id references customer.id"));
    }
}
