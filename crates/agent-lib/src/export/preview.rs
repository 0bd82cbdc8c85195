//! Dry-run preview of metric values

use crate::metrics::PreviewRow;
use tabled::{settings::Style, Table};

/// Receives the rows of a dry-run iteration instead of a publisher
pub trait PreviewSink: Send + Sync {
    fn render(&self, rows: &[PreviewRow]);
}

/// Prints each iteration as a table on stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct TablePreview;

impl PreviewSink for TablePreview {
    fn render(&self, rows: &[PreviewRow]) {
        println!("{}", render_table(rows));
    }
}

/// Format preview rows as a table
pub fn render_table(rows: &[PreviewRow]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}
