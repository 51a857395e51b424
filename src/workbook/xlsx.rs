use super::spec::{column_letter, CellStyle};
use super::{Cell, CellContent, Sheet, Workbook};
use crate::domain::model::CellValue;
use crate::utils::error::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{Seek, Write};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, DateTime};

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

// cellXfs 的索引，順序必須與 STYLES_XML 一致
const XF_DEFAULT: u32 = 0;
const XF_HEADER: u32 = 1;
const XF_DATE: u32 = 2;
const XF_NO_WRAP: u32 = 3;

const STYLES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
    r#"<numFmts count="1"><numFmt numFmtId="164" formatCode="dd/mm/yyyy hh:mm"/></numFmts>"#,
    r#"<fonts count="2">"#,
    r#"<font><sz val="11"/><name val="Calibri"/><family val="2"/></font>"#,
    r#"<font><b/><sz val="14"/><name val="Calibri"/><family val="2"/></font>"#,
    r#"</fonts>"#,
    r#"<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>"#,
    r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
    r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
    r#"<cellXfs count="4">"#,
    r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#,
    r#"<xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1" applyAlignment="1"><alignment vertical="top" wrapText="1"/></xf>"#,
    r#"<xf numFmtId="164" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>"#,
    r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment wrapText="0"/></xf>"#,
    r#"</cellXfs>"#,
    r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
    r#"</styleSheet>"#,
);

/// 共用字串表，依第一次出現的順序編號
#[derive(Debug, Default)]
pub struct SharedStrings {
    index: HashMap<String, usize>,
    values: Vec<String>,
}

impl SharedStrings {
    pub fn intern(&mut self, value: &str) -> usize {
        if let Some(&idx) = self.index.get(value) {
            return idx;
        }
        let idx = self.values.len();
        self.values.push(value.to_string());
        self.index.insert(value.to_string(), idx);
        idx
    }

    fn to_xml(&self) -> String {
        let mut xml = String::from(XML_HEADER);
        let _ = write!(
            xml,
            r#"<sst xmlns="{}" count="{}" uniqueCount="{}">"#,
            MAIN_NS,
            self.values.len(),
            self.values.len()
        );
        for value in &self.values {
            let _ = write!(xml, r#"<si><t xml:space="preserve">{}</t></si>"#, escape(value));
        }
        xml.push_str("</sst>");
        xml
    }
}

/// 寫出 .xlsx；壓縮檔內的時間戳固定，內容相同時輸出位元組相同
pub fn write_workbook<W: Write + Seek>(writer: W, workbook: &Workbook) -> Result<W> {
    let mut strings = SharedStrings::default();
    let sheet_xml: Vec<String> = workbook
        .sheets
        .iter()
        .map(|sheet| sheet_to_xml(sheet, &mut strings))
        .collect();

    let mut zip = ZipWriter::new(writer);

    zip.start_file("[Content_Types].xml", entry_options())?;
    zip.write_all(content_types_xml(workbook.sheets.len()).as_bytes())
        .map_err(render_io)?;

    zip.start_file("_rels/.rels", entry_options())?;
    zip.write_all(root_rels_xml().as_bytes()).map_err(render_io)?;

    zip.start_file("xl/workbook.xml", entry_options())?;
    zip.write_all(workbook_xml(workbook).as_bytes())
        .map_err(render_io)?;

    zip.start_file("xl/_rels/workbook.xml.rels", entry_options())?;
    zip.write_all(workbook_rels_xml(workbook.sheets.len()).as_bytes())
        .map_err(render_io)?;

    zip.start_file("xl/styles.xml", entry_options())?;
    zip.write_all(STYLES_XML.as_bytes()).map_err(render_io)?;

    zip.start_file("xl/sharedStrings.xml", entry_options())?;
    zip.write_all(strings.to_xml().as_bytes()).map_err(render_io)?;

    for (idx, xml) in sheet_xml.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", idx + 1), entry_options())?;
        zip.write_all(xml.as_bytes()).map_err(render_io)?;
    }

    Ok(zip.finish()?)
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
}

fn render_io(err: std::io::Error) -> crate::utils::error::AutoCallerError {
    crate::utils::error::AutoCallerError::render(format!("xlsx write failed: {}", err))
}

fn content_types_xml(sheet_count: usize) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str(r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#);
    xml.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
    xml.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    xml.push_str(r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#);
    for idx in 1..=sheet_count {
        let _ = write!(
            xml,
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            idx
        );
    }
    xml.push_str(r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#);
    xml.push_str(r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
    xml.push_str("</Types>");
    xml
}

fn root_rels_xml() -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
    xml.push_str(r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#);
    xml.push_str("</Relationships>");
    xml
}

fn workbook_xml(workbook: &Workbook) -> String {
    let mut xml = String::from(XML_HEADER);
    let _ = write!(xml, r#"<workbook xmlns="{}" xmlns:r="{}"><sheets>"#, MAIN_NS, REL_NS);
    for (idx, sheet) in workbook.sheets.iter().enumerate() {
        let _ = write!(
            xml,
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(&sheet.name),
            idx + 1,
            idx + 1
        );
    }
    // 開檔時重新計算所有公式
    xml.push_str(r#"</sheets><calcPr calcId="191029" fullCalcOnLoad="1"/></workbook>"#);
    xml
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
    for idx in 1..=sheet_count {
        let _ = write!(
            xml,
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            idx, idx
        );
    }
    let _ = write!(
        xml,
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        sheet_count + 1
    );
    let _ = write!(
        xml,
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#,
        sheet_count + 2
    );
    xml.push_str("</Relationships>");
    xml
}

/// 單一工作表的 XML
pub fn sheet_to_xml(sheet: &Sheet, strings: &mut SharedStrings) -> String {
    let mut xml = String::from(XML_HEADER);
    let _ = write!(xml, r#"<worksheet xmlns="{}" xmlns:r="{}">"#, MAIN_NS, REL_NS);

    let _ = write!(
        xml,
        r#"<sheetViews><sheetView{} workbookViewId="0"/></sheetViews>"#,
        if sheet.right_to_left { r#" rightToLeft="1""# } else { "" }
    );
    xml.push_str(r#"<sheetFormatPr defaultRowHeight="15"/>"#);

    let mut widths = sheet.widths().peekable();
    if widths.peek().is_some() {
        xml.push_str("<cols>");
        for (column, width) in widths {
            let _ = write!(
                xml,
                r#"<col min="{}" max="{}" width="{:.2}" customWidth="1"/>"#,
                column + 1,
                column + 1,
                width
            );
        }
        xml.push_str("</cols>");
    }

    xml.push_str("<sheetData>");
    for (row, cells) in sheet.rows() {
        let _ = write!(xml, r#"<row r="{}">"#, row);
        for (column, cell) in cells {
            write_cell(&mut xml, row, *column, cell, strings);
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn write_cell(xml: &mut String, row: u32, column: usize, cell: &Cell, strings: &mut SharedStrings) {
    let reference = format!("{}{}", column_letter(column), row);
    let style = style_index(cell);
    let style_attr = if style == XF_DEFAULT {
        String::new()
    } else {
        format!(r#" s="{}""#, style)
    };

    match &cell.content {
        CellContent::Formula(formula) => {
            let body = formula.strip_prefix('=').unwrap_or(formula);
            let _ = write!(xml, r#"<c r="{}"{}><f>{}</f></c>"#, reference, style_attr, escape(body));
        }
        CellContent::Value(CellValue::Empty) => {
            if style != XF_DEFAULT {
                let _ = write!(xml, r#"<c r="{}"{}/>"#, reference, style_attr);
            }
        }
        CellContent::Value(CellValue::Text(text)) => {
            let idx = strings.intern(text);
            let _ = write!(xml, r#"<c r="{}"{} t="s"><v>{}</v></c>"#, reference, style_attr, idx);
        }
        CellContent::Value(CellValue::Bool(b)) => {
            let _ = write!(
                xml,
                r#"<c r="{}"{} t="b"><v>{}</v></c>"#,
                reference,
                style_attr,
                u8::from(*b)
            );
        }
        CellContent::Value(CellValue::Number(n)) if n.is_finite() => {
            let _ = write!(xml, r#"<c r="{}"{}><v>{}</v></c>"#, reference, style_attr, n);
        }
        CellContent::Value(CellValue::Number(n)) => {
            let idx = strings.intern(&n.to_string());
            let _ = write!(xml, r#"<c r="{}"{} t="s"><v>{}</v></c>"#, reference, style_attr, idx);
        }
        CellContent::Value(CellValue::DateTime(dt)) => {
            let _ = write!(
                xml,
                r#"<c r="{}"{}><v>{}</v></c>"#,
                reference,
                style_attr,
                excel_serial(*dt)
            );
        }
    }
}

fn style_index(cell: &Cell) -> u32 {
    if matches!(cell.content, CellContent::Value(CellValue::DateTime(_))) {
        return XF_DATE;
    }
    match cell.style {
        CellStyle::Default => XF_DEFAULT,
        CellStyle::Header => XF_HEADER,
        CellStyle::Date => XF_DATE,
        CellStyle::NoWrap => XF_NO_WRAP,
    }
}

fn excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// 1900 日期系統的序號（含 Excel 的 1900 閏年偏移）
pub fn excel_serial(dt: NaiveDateTime) -> f64 {
    let seconds = (dt - excel_epoch()).num_seconds() as f64;
    seconds / 86_400.0
}

pub fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    let millis = (serial * 86_400_000.0).round();
    if !millis.is_finite() {
        return None;
    }
    excel_epoch().checked_add_signed(chrono::Duration::milliseconds(millis as i64))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // XML 1.0 不允許的控制字元直接丟掉
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}
