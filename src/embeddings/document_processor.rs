// PDF text extraction, one entry per page

use tracing::{debug, warn};

use crate::types::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 1-based page number
    pub page: u32,
    pub text: String,
}

pub struct DocumentProcessor;

impl DocumentProcessor {
    pub async fn extract_pdf_pages(file_name: &str, bytes: Vec<u8>) -> AppResult<Vec<PageText>> {
        let file_name = file_name.to_string();
        // lopdf is synchronous and CPU-bound
        tokio::task::spawn_blocking(move || Self::extract_pdf_pages_from_bytes(&file_name, &bytes))
            .await
            .map_err(|e| AppError::Internal(format!("PDF extraction task failed: {}", e)))?
    }

    pub fn extract_pdf_pages_from_bytes(file_name: &str, bytes: &[u8]) -> AppResult<Vec<PageText>> {
        let document = lopdf::Document::load_mem(bytes)
            .map_err(|e| AppError::parse(file_name, format!("not a readable PDF ({})", e)))?;

        let mut pages = Vec::new();
        for page_number in document.get_pages().keys() {
            match document.extract_text(&[*page_number]) {
                Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                    page: *page_number,
                    text,
                }),
                Ok(_) => debug!(file = %file_name, page = page_number, "Skipping empty page"),
                Err(e) => {
                    warn!(file = %file_name, page = page_number, error = %e, "Could not extract page text")
                }
            }
        }

        if pages.is_empty() {
            return Err(AppError::parse(file_name, "no extractable text found"));
        }
        Ok(pages)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// A minimal PDF with one page per entry of `pages`
    pub fn sample_pdf(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_a_parse_error() {
        let result = DocumentProcessor::extract_pdf_pages_from_bytes("notes.pdf", b"not a pdf at all");
        match result {
            Err(AppError::Parse { file, .. }) => assert_eq!(file, "notes.pdf"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_pages_are_numbered_from_one() {
        let bytes = test_support::sample_pdf(&["Quarterly revenue grew", "Costs were flat"]);
        let pages = DocumentProcessor::extract_pdf_pages_from_bytes("report.pdf", &bytes).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert!(pages[0].text.contains("Quarterly revenue grew"));
        assert_eq!(pages[1].page, 2);
        assert!(pages[1].text.contains("Costs were flat"));
    }

    #[tokio::test]
    async fn test_async_extraction_keeps_the_upload_name() {
        let bytes = test_support::sample_pdf(&["Only page"]);
        let pages = DocumentProcessor::extract_pdf_pages("upload.pdf", bytes).await.unwrap();
        assert_eq!(pages.len(), 1);

        let err = DocumentProcessor::extract_pdf_pages("upload.pdf", b"garbage".to_vec()).await;
        assert!(matches!(err, Err(AppError::Parse { file, .. }) if file == "upload.pdf"));
    }
}
