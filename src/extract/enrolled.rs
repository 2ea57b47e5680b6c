use crate::extract::{
    builder, element_text, selector, ContentExpectation, Extraction, ExtractError, Extractor,
    Schema,
};
use scraper::Html;
use std::sync::Arc;

const FIELDS: [&str; 5] = ["id_turma", "nome", "comum", "instrumento", "status"];

/// Placeholder row the site renders for an empty table
const EMPTY_ROW_MARKER: &str = "Nenhum registro";

/// Flattens the enrolled-students table of a class into one record per row
pub struct EnrolledExtractor {
    schema: Arc<Schema>,
}

impl EnrolledExtractor {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(&FIELDS),
        }
    }
}

impl Default for EnrolledExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for EnrolledExtractor {
    fn id(&self) -> &str {
        "enrolled"
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn expects(&self) -> ContentExpectation {
        ContentExpectation::Html
    }

    fn extract(
        &self,
        target: u64,
        body: &[u8],
        _content_type: Option<&str>,
    ) -> Result<Extraction, ExtractError> {
        let html = String::from_utf8_lossy(body);
        let document = Html::parse_document(&html);
        let row_selector = selector("tbody tr")?;
        let cell_selector = selector("td")?;

        let mut rows = Vec::new();
        for row in document.select(&row_selector) {
            let cells: Vec<String> = row
                .select(&cell_selector)
                .map(|cell| element_text(&cell))
                .collect();

            if cells.len() < 4 || cells[0].is_empty() || cells[0].contains(EMPTY_ROW_MARKER) {
                continue;
            }

            rows.push(
                builder(&self.schema)
                    .set("id_turma", target.to_string())?
                    .set("nome", cells[0].as_str())?
                    .set("comum", cells[1].as_str())?
                    .set("instrumento", cells[2].as_str())?
                    .set("status", cells[3].as_str())?
                    .finish()?,
            );
        }

        if rows.is_empty() {
            Ok(Extraction::Filtered)
        } else {
            Ok(Extraction::Rows(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_flattened() {
        let html = r#"<table class="table"><tbody>
<tr><td>ANA</td><td>JARDIM AMANDA</td><td>VIOLA</td><td>Ativo</td><td><a>ver</a></td></tr>
<tr><td>BRUNO</td><td>CENTRO</td><td>TROMPETE</td><td>Inativo</td></tr>
<tr><td>incompleta</td><td>x</td></tr>
</tbody></table>"#;

        let extractor = EnrolledExtractor::new();
        let Extraction::Rows(rows) = extractor.extract(17, html.as_bytes(), None).unwrap() else {
            panic!("expected rows");
        };

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id_turma"), Some("17"));
        assert_eq!(rows[0].get("nome"), Some("ANA"));
        assert_eq!(rows[0].get("instrumento"), Some("VIOLA"));
        assert_eq!(rows[1].get("nome"), Some("BRUNO"));
        assert_eq!(rows[1].get("status"), Some("Inativo"));
    }

    #[test]
    fn test_empty_table_is_filtered() {
        let html = r#"<table><tbody>
<tr><td>Nenhum registro encontrado</td><td></td><td></td><td></td></tr>
</tbody></table>"#;

        let extractor = EnrolledExtractor::new();
        assert_eq!(
            extractor.extract(17, html.as_bytes(), None).unwrap(),
            Extraction::Filtered
        );
    }
}
