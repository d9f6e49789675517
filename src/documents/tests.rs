use super::*;
use tempfile::TempDir;

/// A PDF with one Helvetica text line per page
fn minimal_pdf(page_lines: &[&str]) -> Vec<u8> {
    let page_count = page_lines.len();
    let font_id = 3 + 2 * page_count;
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            (0..page_count)
                .map(|i| format!("{} 0 R", 3 + 2 * i))
                .collect::<Vec<_>>()
                .join(" "),
            page_count
        ),
    ];
    for (i, line) in page_lines.iter().enumerate() {
        let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", line);
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {} 0 R >> >> /Contents {} 0 R >>",
            font_id,
            4 + 2 * i
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, object).as_bytes());
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    pdf
}

#[test]
fn split_pages_without_breaks() {
    let pages = split_pages("just one block");
    assert_eq!(
        pages,
        vec![PageText {
            page: None,
            text: "just one block".to_string()
        }]
    );
}

#[test]
fn split_pages_numbers_from_zero() {
    let pages = split_pages("first\x0csecond\x0cthird");

    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].page, Some(0));
    assert_eq!(pages[0].text, "first");
    assert_eq!(pages[2].page, Some(2));
    assert_eq!(pages[2].text, "third");
}

#[test]
fn supported_extensions() {
    assert!(TextDocumentSource::supports(Path::new("notes.txt")));
    assert!(TextDocumentSource::supports(Path::new("README.MD")));
    assert!(TextDocumentSource::supports(Path::new("a/b/guide.markdown")));
    assert!(TextDocumentSource::supports(Path::new("paper.pdf")));
    assert!(TextDocumentSource::supports(Path::new("SCAN.PDF")));
    assert!(!TextDocumentSource::supports(Path::new("no_extension")));
}

#[test]
fn list_documents_sorted_and_filtered() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(temp_dir.path().join("zeta.txt"), "zzz").expect("should write file");
    fs::write(temp_dir.path().join("alpha.md"), "# alpha").expect("should write file");
    fs::write(temp_dir.path().join("image.png"), [0u8, 1, 2]).expect("should write file");
    fs::write(temp_dir.path().join("manual.pdf"), minimal_pdf(&["x"])).expect("should write file");
    fs::create_dir(temp_dir.path().join("nested.txt")).expect("should create dir");

    let documents = TextDocumentSource::new()
        .list_documents(temp_dir.path())
        .expect("should list documents");

    let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["alpha.md", "manual.pdf", "zeta.txt"]);
    assert_eq!(documents[0].size, 7);
    assert_eq!(documents[2].path, temp_dir.path().join("zeta.txt"));
}

#[test]
fn list_missing_directory_is_empty() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let documents = TextDocumentSource::new()
        .list_documents(&temp_dir.path().join("absent"))
        .expect("missing directory is not an error");

    assert!(documents.is_empty());
}

#[test]
fn load_text_splits_pages_and_drops_bad_bytes() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("scan.txt");
    let mut bytes = b"page one".to_vec();
    bytes.push(0xff);
    bytes.extend_from_slice(b"\x0cpage two");
    fs::write(&path, bytes).expect("should write file");

    let pages = TextDocumentSource::new()
        .load_text(&path)
        .expect("should load text");

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].text, "page one");
    assert_eq!(pages[1].page, Some(1));
    assert_eq!(pages[1].text, "page two");
}

#[test]
fn load_missing_file_is_not_found() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("gone.txt");

    let result = TextDocumentSource::new().load_text(&path);

    assert!(matches!(result, Err(RagError::NotFound(p)) if p == path));
}

#[test]
fn load_pdf_yields_one_block_per_page() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("manual.pdf");
    fs::write(
        &path,
        minimal_pdf(&["Battery care instructions", "Warranty lasts two years"]),
    )
    .expect("should write file");

    let pages = TextDocumentSource::new()
        .load_text(&path)
        .expect("should load pdf");

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].page, Some(0));
    assert!(pages[0].text.contains("Battery care"));
    assert_eq!(pages[1].page, Some(1));
    assert!(pages[1].text.contains("two years"));
}

#[test]
fn malformed_pdf_yields_no_pages() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("broken.pdf");
    fs::write(&path, b"%PDF-1.4 this is not really a pdf").expect("should write file");

    let pages = TextDocumentSource::new()
        .load_text(&path)
        .expect("malformed pdf is not an error");

    assert!(pages.is_empty());
}
