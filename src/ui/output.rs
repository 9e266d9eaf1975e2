use crate::node::Node;
use crate::relationship::Relationship;
use crate::ui::{Icons, theme};
use owo_colors::OwoColorize;

pub fn header(icon: &str, text: &str) {
    println!("{} {}", icon, text.style(theme().header));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info),
        label.style(theme().dim),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim).to_string()
}

/// One-line summary of a node: name, type code, uuid
pub fn node_line(node: &Node) {
    let style = if node.is_active { theme().header } else { theme().inactive };
    println!(
        "{} {} {} {}",
        Icons::NODE,
        node.name.style(style),
        format!("[{}]", node.type_code).style(theme().type_code),
        dim(&node.uuid.to_string())
    );
}

/// Node with its attributes and tags
pub fn node_detail(node: &Node) {
    node_line(node);
    summary_row("id", &node.id.to_string());
    if !node.description.is_empty() {
        summary_row("description", &node.description);
    }
    summary_row("active", &node.is_active.to_string());
    summary_row("access", &node.access_level);
    if let Some(location) = node.location_uuid {
        summary_row("location", &location.to_string());
    }
    if let Some(home) = node.home_uuid {
        summary_row("home", &home.to_string());
    }
    if !node.tags.is_empty() {
        summary_row(Icons::TAG, &node.tags.join(", "));
    }
    for (key, value) in &node.attributes {
        summary_row(&format!("  {key}"), &value.to_string());
    }
}

pub fn relationship_line(rel: &Relationship) {
    println!(
        "  {} {} {} {} {}",
        Icons::LINK,
        rel.source_id,
        format!("-[{}]->", rel.type_code).style(theme().type_code),
        rel.target_id,
        dim(&serde_json::Value::Object(rel.attributes.clone()).to_string())
    );
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().dim), value);
}
