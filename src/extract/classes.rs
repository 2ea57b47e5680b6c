use crate::extract::{
    builder, element_text, selector, ContentExpectation, Extraction, ExtractError, Extractor,
    Schema,
};
use scraper::Html;
use std::sync::Arc;

const FIELDS: [&str; 8] = [
    "id",
    "curso",
    "descricao",
    "dia_semana",
    "data_inicio",
    "data_fim",
    "hora_inicio",
    "hora_fim",
];

/// Extracts a class from its edit form (`form#turmas`)
///
/// Pages without the form are filtered out. Times are truncated to `HH:MM`.
pub struct ClassesExtractor {
    schema: Arc<Schema>,
}

impl ClassesExtractor {
    pub fn new() -> Self {
        Self {
            schema: Schema::new(&FIELDS),
        }
    }
}

impl Default for ClassesExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Text of the selected option of `select[name=...]`
fn selected_text(document: &Html, name: &str) -> Result<String, ExtractError> {
    let css = format!(r#"select[name="{}"] option[selected]"#, name);
    Ok(document
        .select(&selector(&css)?)
        .next()
        .map(|option| element_text(&option))
        .unwrap_or_default())
}

/// Trimmed `value` attribute of `input[name=...]`
fn input_value(document: &Html, name: &str) -> Result<String, ExtractError> {
    let css = format!(r#"input[name="{}"]"#, name);
    Ok(document
        .select(&selector(&css)?)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(|value| value.trim().to_string())
        .unwrap_or_default())
}

fn truncate_time(value: String) -> String {
    value.chars().take(5).collect()
}

impl Extractor for ClassesExtractor {
    fn id(&self) -> &str {
        "classes"
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

        if document.select(&selector("form#turmas")?).next().is_none() {
            return Ok(Extraction::Filtered);
        }

        let record = builder(&self.schema)
            .set("id", target.to_string())?
            .set("curso", selected_text(&document, "id_curso")?)?
            .set("descricao", input_value(&document, "descricao")?)?
            .set("dia_semana", selected_text(&document, "dia_semana")?)?
            .set("data_inicio", input_value(&document, "dt_inicio")?)?
            .set("data_fim", input_value(&document, "dt_fim")?)?
            .set("hora_inicio", truncate_time(input_value(&document, "hr_inicio")?))?
            .set("hora_fim", truncate_time(input_value(&document, "hr_fim")?))?
            .finish()?;

        Ok(Extraction::Rows(vec![record]))
    }
}
