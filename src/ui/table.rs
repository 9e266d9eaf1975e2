use tabled::{Table, Tabled, settings::Style};

use crate::registry::{NodeType, RelationshipType};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Two-column metric table
#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: impl ToString) -> &mut Self {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

#[derive(Tabled)]
struct NodeTypeRow {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Class")]
    typeclass: String,
    #[tabled(rename = "Active")]
    active: bool,
}

#[derive(Tabled)]
struct RelationshipTypeRow {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Directed")]
    directed: bool,
    #[tabled(rename = "Symmetric")]
    symmetric: bool,
    #[tabled(rename = "Transitive")]
    transitive: bool,
}

pub fn node_types_table(types: &[NodeType]) -> String {
    let rows: Vec<NodeTypeRow> = types
        .iter()
        .map(|t| NodeTypeRow {
            code: t.type_code.clone(),
            name: t.type_name.clone(),
            typeclass: t.typeclass.clone(),
            active: t.is_active,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn relationship_types_table(types: &[RelationshipType]) -> String {
    let rows: Vec<RelationshipTypeRow> = types
        .iter()
        .map(|t| RelationshipTypeRow {
            code: t.type_code.clone(),
            name: t.type_name.clone(),
            directed: t.is_directed,
            symmetric: t.is_symmetric,
            transitive: t.is_transitive,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_builder_renders_nothing() {
        assert!(TableBuilder::new().build().is_empty());
    }

    #[test]
    fn test_metric_rows() {
        let mut builder = TableBuilder::new();
        builder.add_row("Nodes", 12).add_row("Edges", "3");
        let table = builder.build();
        assert!(table.contains("Metric"));
        assert!(table.contains("Nodes"));
        assert!(table.contains("12"));
    }

    #[test]
    fn test_relationship_types_table() {
        let types = vec![RelationshipType {
            id: 1,
            type_code: "exit".to_string(),
            type_name: "Exit".to_string(),
            typeclass: "campusgraph::relationship::Relationship".to_string(),
            description: None,
            schema_definition: None,
            is_directed: true,
            is_symmetric: false,
            is_transitive: false,
            is_active: true,
        }];
        let table = relationship_types_table(&types);
        assert!(table.contains("exit"));
        assert!(table.contains("Transitive"));
    }
}
