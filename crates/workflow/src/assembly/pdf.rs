//! PDF generation and merging with lopdf

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const LINES_PER_PAGE: usize = 54;
const LINE_WIDTH: usize = 88;

/// Page attributes a page may inherit from its page tree parents
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF error: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("PDF io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed PDF: {0}")]
    Structure(String),
}

/// Plain text document in a monospaced font, one or more A4 pages
pub fn text_document(lines: &[String]) -> Result<Vec<u8>, PdfError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let wrapped: Vec<String> = lines.iter().flat_map(|line| wrap(line, LINE_WIDTH)).collect();
    let empty: &[String] = &[];
    let chunks: Vec<&[String]> = if wrapped.is_empty() {
        vec![empty]
    } else {
        wrapped.chunks(LINES_PER_PAGE).collect()
    };

    let mut kids = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(11)]),
            Operation::new("TL", vec![Object::Integer(14)]),
            Operation::new("Td", vec![Object::Integer(50), Object::Integer(PAGE_HEIGHT - 52)]),
        ];
        for line in chunk {
            operations.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(line))]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Concatenate documents page by page, keeping the input order
pub fn merge(inputs: &[Vec<u8>]) -> Result<Vec<u8>, PdfError> {
    if inputs.is_empty() {
        return Err(PdfError::Structure("nothing to merge".to_string()));
    }

    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Object)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for bytes in inputs {
        let mut doc = Document::load_mem(bytes)?;
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for (_, page_id) in doc.get_pages() {
            let mut page = doc.get_object(page_id)?.clone();
            inherit_page_attributes(&doc, &mut page);
            pages.push((page_id, page));
        }
        objects.extend(doc.objects);
    }

    let mut document = Document::with_version("1.5");
    let mut catalog: Option<(ObjectId, Object)> = None;
    let mut root_pages: Option<(ObjectId, Object)> = None;

    for (id, object) in objects {
        match type_name(&object) {
            Some(b"Catalog") => {
                catalog.get_or_insert((id, object));
            }
            Some(b"Pages") => {
                root_pages.get_or_insert((id, object));
            }
            // Pages are re-added below; outlines point into the old trees
            Some(b"Page") | Some(b"Outlines") | Some(b"Outline") => {}
            _ => {
                document.objects.insert(id, object);
            }
        }
    }

    let (catalog_id, mut catalog) =
        catalog.ok_or_else(|| PdfError::Structure("catalog not found".to_string()))?;
    let (pages_id, mut root_pages) =
        root_pages.ok_or_else(|| PdfError::Structure("page tree not found".to_string()))?;

    let mut kids = Vec::with_capacity(pages.len());
    for (page_id, mut page) in pages {
        if let Ok(dict) = page.as_dict_mut() {
            dict.set("Parent", pages_id);
        }
        document.objects.insert(page_id, page);
        kids.push(Object::Reference(page_id));
    }

    if let Ok(dict) = root_pages.as_dict_mut() {
        dict.remove(b"Parent");
        dict.set("Count", Object::Integer(kids.len() as i64));
        dict.set("Kids", kids);
    }
    document.objects.insert(pages_id, root_pages);

    if let Ok(dict) = catalog.as_dict_mut() {
        dict.set("Pages", pages_id);
        dict.remove(b"Outlines");
    }
    document.objects.insert(catalog_id, catalog);

    document.trailer.set("Root", catalog_id);
    document.max_id = document.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
    document.renumber_objects();
    document.adjust_zero_pages();
    document.compress();

    let mut out = Vec::new();
    document.save_to(&mut out)?;
    Ok(out)
}

/// Page count of a document
pub fn page_count(bytes: &[u8]) -> Result<usize, PdfError> {
    Ok(Document::load_mem(bytes)?.get_pages().len())
}

fn type_name(object: &Object) -> Option<&[u8]> {
    object.as_dict().ok()?.get(b"Type").ok()?.as_name().ok()
}

fn inherit_page_attributes(doc: &Document, page: &mut Object) {
    let Ok(dict) = page.as_dict_mut() else {
        return;
    };

    let mut parent = dict.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk; malformed files may contain parent cycles
    for _ in 0..32 {
        let Some(parent_id) = parent else {
            break;
        };
        let Ok(parent_dict) = doc.get_object(parent_id).and_then(Object::as_dict) else {
            break;
        };
        for key in INHERITABLE {
            if !dict.has(key) {
                if let Ok(value) = parent_dict.get(key) {
                    dict.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = parent_dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
}

/// Latin-1 subset of WinAnsi; other characters print as '?'
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            code @ 0x20..=0x7E | code @ 0xA0..=0xFF => code as u8,
            _ => b'?',
        })
        .collect()
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    if line.chars().count() <= width {
        return vec![line.to_string()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let needed = if current.is_empty() { 0 } else { 1 } + word.chars().count();
        if !current.is_empty() && current.chars().count() + needed > width {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        while current.chars().count() > width {
            let head: String = current.chars().take(width).collect();
            let tail: String = current.chars().skip(width).collect();
            out.push(head);
            current = tail;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Line {}", i)).collect()
    }

    #[test]
    fn test_text_document_paginates() {
        let one = text_document(&lines(3)).unwrap();
        assert!(one.starts_with(b"%PDF-1.5"));
        assert_eq!(page_count(&one).unwrap(), 1);

        let two = text_document(&lines(LINES_PER_PAGE + 1)).unwrap();
        assert_eq!(page_count(&two).unwrap(), 2);

        // Empty content still yields a page
        assert_eq!(page_count(&text_document(&[]).unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_merge_keeps_every_page() {
        let a = text_document(&lines(LINES_PER_PAGE * 2)).unwrap();
        let b = text_document(&lines(1)).unwrap();

        let merged = merge(&[a, b]).unwrap();
        assert_eq!(page_count(&merged).unwrap(), 3);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let inputs = vec![
            text_document(&["first".to_string()]).unwrap(),
            text_document(&["second".to_string()]).unwrap(),
        ];
        assert_eq!(merge(&inputs).unwrap(), merge(&inputs).unwrap());
    }

    #[test]
    fn test_merge_rejects_garbage() {
        assert!(merge(&[]).is_err());
        assert!(merge(&[b"not a pdf".to_vec()]).is_err());
    }

    #[test]
    fn test_win_ansi() {
        assert_eq!(win_ansi("Università €"), b"Universit\xe0 ?".to_vec());
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("short", 10), vec!["short"]);
        assert_eq!(wrap("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }
}
