use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use chrono::NaiveDate;
use cmconnect_core::error::PipelineError;
use cmconnect_core::parser::{read_sheet, CalamineWorkbook, CellValue, ParserError, WorkbookSource};
use cmconnect_core::pipeline::{Pipeline, PipelineConfig};
use cmconnect_core::store::MemoryTableStore;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

enum Cell {
    Text(&'static str),
    Number(f64),
    Blank,
}

type Grid = Vec<Vec<Cell>>;

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn sheet_xml(rows: &Grid, strings: &mut Vec<String>) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (row_index, row) in rows.iter().enumerate() {
        let r = row_index + 1;
        xml.push_str(&format!(r#"<row r="{r}">"#));
        for (column_index, cell) in row.iter().enumerate() {
            let reference = format!("{}{r}", (b'A' + column_index as u8) as char);
            match cell {
                Cell::Text(value) => {
                    let index = match strings.iter().position(|known| known == value) {
                        Some(index) => index,
                        None => {
                            strings.push(value.to_string());
                            strings.len() - 1
                        }
                    };
                    xml.push_str(&format!(r#"<c r="{reference}" t="s"><v>{index}</v></c>"#));
                }
                Cell::Number(value) => {
                    xml.push_str(&format!(r#"<c r="{reference}"><v>{value}</v></c>"#));
                }
                Cell::Blank => {}
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Assembles a minimal but well-formed xlsx package holding the given sheets.
fn build_xlsx(sheets: &[(&str, Grid)]) -> Result<Vec<u8>> {
    let mut strings = Vec::new();
    let worksheets: Vec<String> = sheets
        .iter()
        .map(|(_, rows)| sheet_xml(rows, &mut strings))
        .collect();

    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#,
    );
    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut relationships = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (index, (name, _)) in sheets.iter().enumerate() {
        let n = index + 1;
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
            escape(name)
        ));
        relationships.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{n}.xml"/>"#
        ));
    }
    content_types.push_str("</Types>");
    workbook.push_str("</sheets></workbook>");
    relationships.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#,
        sheets.len() + 1
    ));

    let mut shared = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">"#,
        strings.len()
    );
    for value in &strings {
        shared.push_str(&format!("<si><t>{}</t></si>", escape(value)));
    }
    shared.push_str("</sst>");

    let package_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

    let mut parts = vec![
        ("[Content_Types].xml".to_string(), content_types),
        ("_rels/.rels".to_string(), package_rels.to_string()),
        ("xl/workbook.xml".to_string(), workbook),
        ("xl/_rels/workbook.xml.rels".to_string(), relationships),
        ("xl/sharedStrings.xml".to_string(), shared),
    ];
    for (index, xml) in worksheets.into_iter().enumerate() {
        parts.push((format!("xl/worksheets/sheet{}.xml", index + 1), xml));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, contents) in parts {
        zip.start_file(name, options)?;
        zip.write_all(contents.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}

fn eps_sheet() -> Grid {
    vec![
        vec![
            Cell::Text("Grievance ID"),
            Cell::Blank,
            Cell::Text("Block"),
            Cell::Text("District"),
            Cell::Text("Date of Complaint"),
        ],
        vec![
            Cell::Text("G-1"),
            Cell::Text("A. Marak"),
            Cell::Text("North C & RD Block"),
            Cell::Text("Ri-Bhoi"),
            Cell::Number(45_292.0),
        ],
        vec![
            Cell::Text("G-2"),
            Cell::Blank,
            Cell::Text("south c and rd block"),
            Cell::Text("East Khasi Hills"),
            Cell::Text("05-01-24"),
        ],
    ]
}

fn crm_sheet() -> Grid {
    vec![
        vec![Cell::Text("Case No."), Cell::Text("Status")],
        vec![Cell::Text("C-1"), Cell::Text("Open")],
    ]
}

fn write_file(path: &Path, bytes: &[u8], age_secs: u64) -> Result<()> {
    fs::write(path, bytes)?;
    File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now() - Duration::from_secs(age_secs))?;
    Ok(())
}

fn day(y: i32, m: u32, d: u32) -> CellValue {
    CellValue::Date(
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid date"),
    )
}

fn pipeline_for(input_dir: &Path) -> Result<Pipeline> {
    Ok(Pipeline::new(PipelineConfig {
        input_dir: input_dir.to_path_buf(),
        ..PipelineConfig::default()
    })?)
}

#[test]
fn calamine_reader_keeps_blank_header_cells() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("grievances.xlsx");
    fs::write(&path, build_xlsx(&[("EPS RAW", eps_sheet()), ("CRM RAW", crm_sheet())])?)?;

    let mut workbook = CalamineWorkbook::open(&path)?;
    assert_eq!(workbook.sheet_names(), vec!["EPS RAW", "CRM RAW"]);

    let eps = read_sheet(&mut workbook, "EPS RAW")?;
    assert_eq!(
        eps.columns,
        vec!["Grievance ID", "", "Block", "District", "Date of Complaint"]
    );
    assert_eq!(eps.row_count(), 2);
    assert_eq!(eps.rows[0][4], CellValue::Number(45_292.0));
    assert_eq!(eps.rows[1][1], CellValue::Empty);
    assert_eq!(eps.rows[0][2], CellValue::text("North C & RD Block"));
    Ok(())
}

#[tokio::test]
async fn execute_loads_the_newest_workbook_on_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let stale = build_xlsx(&[
        ("EPS RAW", vec![vec![Cell::Text("Legacy")], vec![Cell::Text("x")]]),
        ("CRM RAW", crm_sheet()),
    ])?;
    let current = build_xlsx(&[("EPS RAW", eps_sheet()), ("CRM RAW", crm_sheet())])?;
    write_file(&dir.path().join("export_a.xlsx"), &stale, 600)?;
    write_file(&dir.path().join("export_b.xlsx"), &current, 5)?;

    let store = MemoryTableStore::new();
    let receipt = pipeline_for(dir.path())?.execute(&store, None).await?;

    assert_eq!(receipt.source_file.file_name().unwrap(), "export_b.xlsx");
    assert_eq!(
        receipt.source_hash.as_deref(),
        Some(blake3::hash(&current).to_hex().as_str())
    );

    let eps = store.table("staging_grievance").expect("eps table");
    let names: Vec<&str> = eps.columns.iter().map(|column| column.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["grievance_id", "officer_name", "block", "district", "date_of_complaint"]
    );
    assert_eq!(
        eps.rows,
        vec![
            vec![
                CellValue::text("G-1"),
                CellValue::text("A. Marak"),
                CellValue::text("North"),
                CellValue::text("Ri Bhoi"),
                day(2024, 1, 1),
            ],
            vec![
                CellValue::text("G-2"),
                CellValue::Empty,
                CellValue::text("South"),
                CellValue::text("East Khasi Hills"),
                day(2024, 1, 5),
            ],
        ]
    );

    let crm = store.table("crm_raw").expect("crm table");
    assert_eq!(crm.rows, vec![vec![CellValue::text("C-1"), CellValue::text("Open")]]);
    Ok(())
}

#[tokio::test]
async fn workbook_without_crm_sheet_fails_on_read() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("grievances.xlsx");
    fs::write(&path, build_xlsx(&[("EPS RAW", eps_sheet())])?)?;

    let err = pipeline_for(dir.path())?.read(&path).await.unwrap_err();

    match err {
        PipelineError::Parse(ParserError::SheetNotFound { sheet, available }) => {
            assert_eq!(sheet, "CRM RAW");
            assert_eq!(available, vec!["EPS RAW".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn execute_against_real_file_without_crm_sheet_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("grievances.xlsx"),
        build_xlsx(&[("EPS RAW", eps_sheet())])?,
    )?;

    let store = MemoryTableStore::new();
    let err = pipeline_for(dir.path())?
        .execute(&store, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "sheet_not_found");
    assert_eq!(store.open_count(), 0);
    assert!(store.table_names().is_empty());
    Ok(())
}
