pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    dim, error, header, info, node_detail, node_line, relationship_line, section, success,
    summary_row, warn,
};
pub use progress::{ImportProgress, Spinner};
pub use table::{TableBuilder, node_types_table, relationship_types_table};
pub use theme::{Theme, theme};
