use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Table};

use cmconnect_core::pipeline::RunReceipt;

pub fn render(receipt: &RunReceipt) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        Cell::new("table"),
        Cell::new("rows"),
        Cell::new("columns"),
        Cell::new("batches"),
    ]);

    for summary in &receipt.tables {
        table.add_row(vec![
            Cell::new(&summary.table),
            Cell::new(summary.rows).set_alignment(CellAlignment::Right),
            Cell::new(summary.columns).set_alignment(CellAlignment::Right),
            Cell::new(summary.batches).set_alignment(CellAlignment::Right),
        ]);
    }

    let hash = receipt.source_hash.as_deref().unwrap_or("-");
    format!(
        "run {}\nsource {} (blake3 {hash})\nfinished in {} ms\n{table}",
        receipt.run_id,
        receipt.source_file.display(),
        receipt.elapsed_ms,
    )
}
