pub mod errors;
pub mod model;
mod workbook;

pub use errors::ParserError;
pub use model::{CellValue, RawSheet, RawWorkbook, SheetNames};
pub use workbook::{read_sheet, read_workbook, CalamineWorkbook, InMemoryWorkbook, WorkbookSource};
