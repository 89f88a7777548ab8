//! Display helpers shared by commands.

pub mod table;

pub use table::{list_table, render_list};
